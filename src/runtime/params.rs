//! Route/query parameters and `{{name}}` text interpolation.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

use super::dom::{Dom, NodeId};

pub type Params = BTreeMap<String, String>;

/// Parameters handed to a component instance before its connected callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    /// Captured from the path by the unit's route pattern.
    pub route: Params,
    /// Decoded from the query string.
    pub query: Params,
    /// Route parameters with query parameters merged over them.
    pub merged: Params,
}

lazy_static! {
    static ref ROUTE_PARAM_RE: Regex = Regex::new(r":([A-Za-z_$][A-Za-z0-9_$]*)").unwrap();
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_$][A-Za-z0-9_$.-]*)\s*\}\}").unwrap();
}

/// Positional route parameters: each `:name` segment of `pattern` captures a
/// run of non-slash characters of `path`. Returns `None` when the path does
/// not match.
pub fn route_params(pattern: &str, path: &str) -> Option<Params> {
    let mut source = String::from("^");
    let mut names = Vec::new();
    let mut last = 0;
    for caps in ROUTE_PARAM_RE.captures_iter(pattern) {
        let whole = caps.get(0)?;
        source.push_str(&regex::escape(&pattern[last..whole.start()]));
        source.push_str("([^/]+)");
        names.push(caps[1].to_string());
        last = whole.end();
    }
    source.push_str(&regex::escape(&pattern[last..]));
    source.push_str("/?$");

    let re = match Regex::new(&source) {
        Ok(re) => re,
        Err(e) => {
            log::warn!("[sfc] route pattern {:?} is not usable: {}", pattern, e);
            return None;
        }
    };
    let caps = re.captures(path)?;
    Some(
        names
            .into_iter()
            .enumerate()
            .filter_map(|(i, name)| caps.get(i + 1).map(|m| (name, m.as_str().to_string())))
            .collect(),
    )
}

/// Decode a query string (with or without the leading `?`). Later keys win.
pub fn query_params(query: &str) -> Params {
    url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

/// Route and query parameters for `location`.
pub fn compute_params(route_path: Option<&str>, location: &str) -> ParamSet {
    let (path, query) = location.split_once('?').unwrap_or((location, ""));
    let route = route_path
        .and_then(|pattern| route_params(pattern, path))
        .unwrap_or_default();
    let query = query_params(query);
    let mut merged = route.clone();
    merged.extend(query.iter().map(|(k, v)| (k.clone(), v.clone())));
    ParamSet {
        route,
        query,
        merged,
    }
}

/// Replace `{{ key }}` in `text` for every key present in `params`.
pub fn interpolate_text(text: &str, params: &Params) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &regex::Captures| match params.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Interpolate every text node under `root`. Returns the number of text nodes
/// changed.
pub fn interpolate(dom: &mut Dom, root: NodeId, params: &Params) -> usize {
    if params.is_empty() {
        return 0;
    }
    let mut changed = 0;
    for id in dom.text_nodes(root) {
        let Some(text) = dom.text(id) else {
            continue;
        };
        if !text.contains("{{") {
            continue;
        }
        let replaced = interpolate_text(text, params);
        if replaced != text {
            dom.set_text(id, replaced);
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_route_params() {
        let got = route_params("/users/:id/:tab", "/users/42/posts").unwrap();
        assert_eq!(got, params(&[("id", "42"), ("tab", "posts")]));
        assert_eq!(route_params("/users/:id", "/users/42/"), Some(params(&[("id", "42")])));
        assert_eq!(route_params("/users/:id", "/users/42/posts"), None);
        assert_eq!(route_params("/a.b/:x", "/aXb/1"), None);
    }

    #[test]
    fn test_query_merged_over_route() {
        let got = compute_params(Some("/users/:id"), "/users/42?id=7&q=a%20b&flag");
        assert_eq!(got.route, params(&[("id", "42")]));
        assert_eq!(got.query, params(&[("id", "7"), ("q", "a b"), ("flag", "")]));
        assert_eq!(got.merged, params(&[("id", "7"), ("q", "a b"), ("flag", "")]));

        let no_route = compute_params(None, "/x?y=1");
        assert!(no_route.route.is_empty());
        assert_eq!(no_route.merged, params(&[("y", "1")]));
    }

    #[test]
    fn test_interpolate_text() {
        let p = params(&[("id", "42")]);
        assert_eq!(interpolate_text("ID: {{id}}", &p), "ID: 42");
        assert_eq!(interpolate_text("ID: {{  id }}", &p), "ID: 42");
        assert_eq!(interpolate_text("{{missing}} {{id}}", &p), "{{missing}} 42");
        assert_eq!(interpolate_text("{{ identity }}", &p), "{{ identity }}");
    }

    #[test]
    fn test_interpolate_tree() {
        let mut dom = Dom::new();
        let root = dom.create_element("div");
        let p = dom.create_element("p");
        let a = dom.create_text("ID: {{id}}");
        let b = dom.create_text("static");
        dom.append_child(p, a);
        dom.append_child(root, p);
        dom.append_child(root, b);

        assert_eq!(interpolate(&mut dom, root, &params(&[("id", "42")])), 1);
        assert_eq!(dom.text(a), Some("ID: 42"));
        assert_eq!(dom.text(b), Some("static"));
    }
}
