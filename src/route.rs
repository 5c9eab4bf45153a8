//! Route metadata.
//!
//! Builds a `RouteDescriptor` from the attributes of a `<route>` region and
//! collects descriptors into the manifest consumed by the client router and
//! static-site generation.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codegen::GeneratedModule;
use crate::error::{Diagnostic, DIAG_ROUTE};
use crate::script::infer_tag;

lazy_static! {
    static ref PARAM_RE: Regex = Regex::new(r":([A-Za-z_$][A-Za-z0-9_$]*)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDescriptor {
    pub path: String,
    pub methods: Vec<String>,
    pub param_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub handler_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_method: Option<String>,
    /// Source unit the route was declared in. Only set in manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl RouteDescriptor {
    pub fn is_redirect(&self) -> bool {
        self.redirect.is_some()
    }
}

/// `:name` segments of a route path, left to right, duplicates kept.
pub fn param_names(path: &str) -> Vec<String> {
    PARAM_RE
        .captures_iter(path)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn parse_methods(attrs: &BTreeMap<String, String>) -> Vec<String> {
    let raw = attrs.get("methods").or_else(|| attrs.get("method"));
    let methods: Vec<String> = raw
        .map(|value| {
            value
                .split(',')
                .map(|m| m.trim().to_ascii_uppercase())
                .filter(|m| !m.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if methods.is_empty() {
        vec!["GET".to_string()]
    } else {
        methods
    }
}

/// Build the descriptor for a route region.
///
/// A route without `path` cannot be matched by the router, so it is reported
/// as a diagnostic instead of producing a descriptor.
pub fn describe_route(
    attrs: &BTreeMap<String, String>,
    script: &str,
) -> Result<RouteDescriptor, Diagnostic> {
    let path = match attrs.get("path").map(|p| p.trim()) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => {
            return Err(Diagnostic::new(
                DIAG_ROUTE,
                "<route> is missing a `path` attribute; route ignored",
            ))
        }
    };

    let redirect = attrs.get("redirect").cloned();
    let redirect_method = attrs
        .get("redirect-method")
        .or_else(|| attrs.get("redirectMethod"))
        .cloned();

    let (tag, handler_only) = if redirect.is_some() {
        (None, false)
    } else {
        match attrs.get("tag").cloned().or_else(|| infer_tag(script)) {
            Some(tag) => (Some(tag), false),
            None => (None, true),
        }
    };

    Ok(RouteDescriptor {
        param_names: param_names(&path),
        path,
        methods: parse_methods(attrs),
        tag,
        handler_only,
        redirect,
        redirect_method,
        file: None,
    })
}

/// Manifest derived from compiled output, one entry per routed unit.
pub fn manifest_from_modules(modules: &[GeneratedModule]) -> Vec<RouteDescriptor> {
    let mut routes: Vec<RouteDescriptor> = modules.iter().filter_map(|m| m.route.clone()).collect();
    sort_manifest(&mut routes);
    routes
}

pub fn sort_manifest(routes: &mut [RouteDescriptor]) {
    routes.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.file.cmp(&b.file)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_param_names_in_order() {
        assert_eq!(param_names("/users/:id/:tab"), vec!["id", "tab"]);
        assert_eq!(param_names("/a/:x/b/:x"), vec!["x", "x"]);
        assert!(param_names("/static/page").is_empty());
    }

    #[test]
    fn test_param_count_matches_segments() {
        for path in ["/", "/:a", "/:a/:b/:c", "/files/:dir/raw/:name"] {
            let segments = path.split('/').filter(|s| s.starts_with(':')).count();
            assert_eq!(param_names(path).len(), segments, "{}", path);
        }
    }

    #[test]
    fn test_tag_from_script() {
        let route = describe_route(
            &attrs(&[("path", "/users/:id"), ("methods", "get, post")]),
            "export default { tag: 'user-page', connected() {} }",
        )
        .unwrap();
        assert_eq!(route.tag.as_deref(), Some("user-page"));
        assert!(!route.handler_only);
        assert_eq!(route.methods, vec!["GET", "POST"]);
        assert_eq!(route.param_names, vec!["id"]);
    }

    #[test]
    fn test_handler_only_without_tag() {
        let route = describe_route(&attrs(&[("path", "/api/ping")]), "").unwrap();
        assert!(route.handler_only);
        assert_eq!(route.tag, None);
        assert_eq!(route.methods, vec!["GET"]);
    }

    #[test]
    fn test_redirect_skips_tag_inference() {
        let route = describe_route(
            &attrs(&[
                ("path", "/old"),
                ("redirect", "/new"),
                ("redirect-method", "replace"),
            ]),
            "export default class extends X { static tag = 'old-page' }",
        )
        .unwrap();
        assert!(route.is_redirect());
        assert_eq!(route.tag, None);
        assert!(!route.handler_only);
        assert_eq!(route.redirect_method.as_deref(), Some("replace"));
    }

    #[test]
    fn test_missing_path_is_diagnostic() {
        let err = describe_route(&attrs(&[("tag", "x-a")]), "").unwrap_err();
        assert_eq!(err.code, DIAG_ROUTE);
    }

    #[test]
    fn test_serialized_shape() {
        let route = describe_route(&attrs(&[("path", "/p/:id"), ("tag", "p-page")]), "").unwrap();
        let json = serde_json::to_string(&route).unwrap();
        assert_eq!(
            json,
            r#"{"path":"/p/:id","methods":["GET"],"paramNames":["id"],"tag":"p-page","handlerOnly":false}"#
        );
    }
}
