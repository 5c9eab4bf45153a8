//! Codegen module for the SFC compiler
//!
//! Assembles the generated module for a source unit: runtime imports, child
//! component imports, embedded template/style/route constants, the behavior
//! script re-export and the registration call.

use serde::{Deserialize, Serialize};

use crate::annotations::{AnnotationMetadata, ANNOTATION_TABLE};
use crate::config::CompileOptions;
use crate::error::Diagnostic;
use crate::parse::BlockSet;
use crate::route::RouteDescriptor;
use crate::script::{infer_tag, tag_from_path, ExportShape};
use crate::sourcemap::LineMap;
use crate::style::PreprocessedStyles;

/// Query suffix of the secondary module that serves the behavior script.
pub const SCRIPT_QUERY: &str = "?sfc-script";

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT/OUTPUT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct CodegenInput<'a> {
    pub source_path: &'a str,
    pub source_text: &'a str,
    pub blocks: &'a BlockSet,
    pub styles: &'a PreprocessedStyles,
    pub annotations: &'a [AnnotationMetadata],
    /// Default-owner annotations, as exported in the script's table.
    pub annotation_table: &'a [AnnotationMetadata],
    pub route: Option<RouteDescriptor>,
    /// Resolved child component paths, in template order.
    pub child_imports: Vec<String>,
    pub shape: ExportShape,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedModule {
    pub code: String,
    /// V3 source map JSON
    pub source_map: Option<String>,
    pub scoped_css: Option<String>,
    pub global_css: Option<String>,
    pub template_text: String,
    /// Declared tag, or the file-stem tag of a unit without a script. `None`
    /// when a script declares no tag; registration then fails at runtime.
    #[serde(default)]
    pub tag: Option<String>,
    pub shape: ExportShape,
    #[serde(default)]
    pub annotations: Vec<AnnotationMetadata>,
    /// What the registration reads as `__sfcAnnotations`: the default export's
    /// annotations only.
    #[serde(default)]
    pub annotation_table: Vec<AnnotationMetadata>,
    #[serde(default)]
    pub route: Option<RouteDescriptor>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Escape text for embedding in a template literal.
pub fn escape_template_literal(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('`', "\\`")
        .replace("${", "\\${")
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s.replace('"', "\\\"")))
}

fn css_constant(name: &str, css: Option<&str>) -> String {
    match css {
        Some(css) => format!("const {} = `{}`;\n", name, escape_template_literal(css)),
        None => format!("const {} = null;\n", name),
    }
}

pub fn script_module_id(source_path: &str, blocks: &BlockSet) -> String {
    let ext = match &blocks.script {
        Some(script) if script.is_typescript() => "ts",
        _ => "js",
    };
    format!("{}{}.{}", source_path, SCRIPT_QUERY, ext)
}

fn line_count(code: &str) -> usize {
    code.matches('\n').count()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn generate_module(input: CodegenInput<'_>, options: &CompileOptions) -> GeneratedModule {
    let blocks = input.blocks;
    let has_script = blocks.script.is_some();
    let shape = if has_script {
        input.shape
    } else {
        ExportShape::Missing
    };
    let tag = match infer_tag(blocks.script_text()) {
        Some(tag) => Some(tag),
        None if !has_script => Some(tag_from_path(input.source_path)),
        None => None,
    };
    let mut code = String::new();
    let mut line_map = LineMap::new();

    for diagnostic in &input.diagnostics {
        code.push_str(&diagnostic.as_comment());
        code.push('\n');
    }

    // 1. Runtime entry points
    code.push_str(&format!(
        "import {{ defineComponent, attachStyles }} from {};\n",
        js_string(&options.runtime_module)
    ));

    // 2. Child components
    for child in input
        .child_imports
        .iter()
        .filter(|child| child.as_str() != input.source_path)
    {
        code.push_str(&format!("import {};\n", js_string(child)));
    }

    // 3. Style and template constants
    code.push_str(&css_constant("__scopedCss", input.styles.scoped_css.as_deref()));
    code.push_str(&css_constant("__globalCss", input.styles.global_css.as_deref()));
    let template_start = line_count(&code) + 1;
    code.push_str(&format!(
        "const __template = `{}`;\n",
        escape_template_literal(&blocks.template)
    ));
    if !blocks.template.is_empty() {
        line_map.add_range(
            template_start,
            blocks.template_line,
            blocks.template.lines().count(),
        );
    }

    // 4. Route metadata
    let route_literal = input
        .route
        .as_ref()
        .and_then(|r| serde_json::to_string(r).ok())
        .unwrap_or_else(|| "null".to_string());
    code.push_str(&format!("const __route = {};\n", route_literal));
    code.push_str(&format!("const __sfcId = {};\n", js_string(input.source_path)));

    // 5. Behavior script
    if has_script {
        let script_id = js_string(&script_module_id(input.source_path, blocks));
        code.push_str(&format!("import * as __behavior from {};\n", script_id));
        code.push_str(&format!("export * from {};\n", script_id));
        code.push_str(&format!(
            "const __annotations = __behavior.{} || [];\n",
            ANNOTATION_TABLE
        ));
    } else {
        code.push_str("const __annotations = [];\n");
    }
    code.push_str(
        "const __meta = { template: __template, styles: __scopedCss, route: __route, __sfcId, __sfcAnnotations: __annotations };\n",
    );

    // 6. Registration. Options objects carry their own tag; one that lacks
    // it is rejected by defineComponent.
    match shape {
        ExportShape::Constructor => {
            code.push_str("const __component = Object.assign(__behavior.default, __meta);\n");
        }
        ExportShape::Options => {
            code.push_str("const __component = Object.assign({}, __behavior.default, __meta);\n");
        }
        ExportShape::Dynamic => {
            code.push_str("const __default = __behavior.default;\n");
            code.push_str(
                "const __component = typeof __default === \"function\"\n  ? Object.assign(__default, __meta)\n  : Object.assign({}, __default, __meta);\n",
            );
        }
        ExportShape::Missing => {
            let base = match &tag {
                Some(tag) => format!("{{ tag: {} }}", js_string(tag)),
                None => "{}".to_string(),
            };
            code.push_str(&format!("const __component = Object.assign({}, __meta);\n", base));
        }
    }
    code.push_str("defineComponent(__component);\n");
    code.push_str("if (__globalCss !== null) attachStyles(document, __globalCss);\n");
    code.push_str("export default __component;\n");

    let source_map = options.source_maps.then(|| {
        line_map
            .to_v3(
                &format!("{}.js", input.source_path),
                input.source_path,
                Some(input.source_text),
            )
            .to_json()
    });

    GeneratedModule {
        code,
        source_map,
        scoped_css: input.styles.scoped_css.clone(),
        global_css: input.styles.global_css.clone(),
        template_text: blocks.template.clone(),
        tag,
        shape,
        annotations: input.annotations.to_vec(),
        annotation_table: input.annotation_table.to_vec(),
        route: input.route,
        diagnostics: input.diagnostics,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{extract_blocks, SourceUnit};
    use crate::sourcemap::SourceMapV3;

    fn generate(path: &str, source: &str, shape: ExportShape, children: Vec<String>) -> GeneratedModule {
        let options = CompileOptions::default();
        let blocks = extract_blocks(&SourceUnit::new(path, source), &options);
        let styles = PreprocessedStyles {
            scoped_css: Some("p { color: red; }".to_string()),
            global_css: None,
            diagnostics: vec![],
        };
        generate_module(
            CodegenInput {
                source_path: path,
                source_text: source,
                blocks: &blocks,
                styles: &styles,
                annotations: &[],
                annotation_table: &[],
                route: None,
                child_imports: children,
                shape,
                diagnostics: vec![],
            },
            &options,
        )
    }

    #[test]
    fn test_escape_template_literal() {
        assert_eq!(escape_template_literal("a`b"), "a\\`b");
        assert_eq!(escape_template_literal("${x}"), "\\${x}");
        assert_eq!(escape_template_literal("c:\\d"), "c:\\\\d");
    }

    #[test]
    fn test_emission_order() {
        let module = generate(
            "/src/todo-list.sfc",
            "<template><todo-item></todo-item></template>\n<script>export default { tag: 'todo-list' }</script>",
            ExportShape::Options,
            vec!["/src/todo-item.sfc".to_string(), "/src/todo-list.sfc".to_string()],
        );
        let code = &module.code;
        let pos = |needle: &str| code.find(needle).unwrap_or_else(|| panic!("missing {}", needle));

        assert!(pos("import { defineComponent, attachStyles } from \"sfc/runtime\"") < pos("import \"/src/todo-item.sfc\""));
        assert!(pos("import \"/src/todo-item.sfc\"") < pos("const __scopedCss"));
        assert!(pos("const __template") < pos("const __route = null"));
        assert!(pos("const __route") < pos("import * as __behavior from \"/src/todo-list.sfc?sfc-script.js\""));
        assert!(pos("export * from") < pos("defineComponent(__component)"));
        assert!(!code.contains("import \"/src/todo-list.sfc\""));
        assert_eq!(module.tag.as_deref(), Some("todo-list"));
        assert!(code.contains("const __component = Object.assign({}, __behavior.default, __meta);"));
    }

    #[test]
    fn test_options_without_tag_get_no_fallback() {
        let module = generate(
            "/src/card.sfc",
            "<template><p></p></template><script>export default { connectedCallback() {} }</script>",
            ExportShape::Options,
            vec![],
        );
        assert_eq!(module.tag, None);
        assert!(!module.code.contains("x-card"));
        assert!(module
            .code
            .contains("const __component = Object.assign({}, __behavior.default, __meta);"));
    }

    #[test]
    fn test_registration_by_shape() {
        let ctor = generate("/a/x-a.sfc", "<script>export default class A {}</script>", ExportShape::Constructor, vec![]);
        assert!(ctor.code.contains("Object.assign(__behavior.default, __meta)"));
        assert!(!ctor.code.contains("typeof __default"));

        let dynamic = generate("/a/x-a.sfc", "<script>export default make()</script>", ExportShape::Dynamic, vec![]);
        assert!(dynamic.code.contains("typeof __default === \"function\""));
    }

    #[test]
    fn test_zero_script_unit() {
        let module = generate("/src/Banner.sfc", "<template><p>hi</p></template>", ExportShape::Options, vec![]);
        assert_eq!(module.shape, ExportShape::Missing);
        assert_eq!(module.tag.as_deref(), Some("x-banner"));
        assert!(!module.code.contains("__behavior"));
        assert!(module
            .code
            .contains("const __component = Object.assign({ tag: \"x-banner\" }, __meta);"));
        assert!(module.code.contains("const __scopedCss = `p { color: red; }`;"));
    }

    #[test]
    fn test_template_is_escaped_and_mapped() {
        let source = "\n<template>\n  <p>`${x}`</p>\n  <i>2</i>\n</template>";
        let module = generate("/src/x-t.sfc", source, ExportShape::Missing, vec![]);
        assert!(module.code.contains("const __template = `<p>\\`\\${x}\\`</p>\n  <i>2</i>`;"));

        let map: SourceMapV3 = serde_json::from_str(module.source_map.as_deref().unwrap()).unwrap();
        assert_eq!(map.sources, vec!["/src/x-t.sfc"]);
        // Template text starts on source line 3 (0-based 2).
        let template_line = module
            .code
            .lines()
            .position(|l| l.starts_with("const __template"))
            .unwrap();
        let segments: Vec<&str> = map.mappings.split(';').collect();
        assert_eq!(segments[template_line], "AAEA");
        assert_eq!(segments[template_line + 1], "AACA");
    }
}
