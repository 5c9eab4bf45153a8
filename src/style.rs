//! Style Preprocessor
//!
//! Classifies style regions as scoped or global, compiles regions written in
//! the extended (nested) dialect to plain CSS, and joins each class in source
//! order. A failed compile never fails the transform: the raw text is used and
//! a diagnostic is carried to the generated module.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::config::CompileOptions;
use crate::error::{Diagnostic, DIAG_STYLE_COMPILE};
use crate::parse::{StyleDialect, StyleRegion};

lazy_static! {
    static ref VARIABLE_RE: Regex = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_-]*)").unwrap();
}

/// At-rules whose bodies hold rules that still belong to the enclosing selector.
const CONDITIONAL_AT_RULES: &[&str] = &["media", "supports", "container", "layer", "document"];

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Decide `(is_global, dialect)` for a style region from its opening-tag attributes.
pub fn classify_region(
    attributes: &BTreeMap<String, String>,
    options: &CompileOptions,
) -> (bool, StyleDialect) {
    let is_global = attributes
        .iter()
        .any(|(name, value)| options.is_global_marker(name) && value != "false");

    let dialect = match attributes.get("lang") {
        Some(lang) if options.is_extended_dialect(lang) => StyleDialect::Extended,
        _ => StyleDialect::Plain,
    };

    (is_global, dialect)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLUGGABLE COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StyleCompileError {
    pub message: String,
}

impl StyleCompileError {
    fn new(message: impl Into<String>) -> Self {
        StyleCompileError {
            message: message.into(),
        }
    }
}

/// Compiles extended-dialect style text to plain CSS.
pub trait StyleCompiler: Send + Sync {
    fn compile(&self, source: &str, region: &StyleRegion) -> Result<String, StyleCompileError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreprocessedStyles {
    pub scoped_css: Option<String>,
    pub global_css: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Compile and partition regions into the scoped and global strings.
pub fn preprocess_styles(regions: &[StyleRegion], compiler: &dyn StyleCompiler) -> PreprocessedStyles {
    let mut scoped = Vec::new();
    let mut global = Vec::new();
    let mut diagnostics = Vec::new();

    for (index, region) in regions.iter().enumerate() {
        let css = match region.dialect {
            StyleDialect::Plain => region.raw_content.clone(),
            StyleDialect::Extended => match compiler.compile(&region.raw_content, region) {
                Ok(css) => css,
                Err(e) => {
                    log::warn!("[sfc] style region {} failed to compile: {}", index, e);
                    diagnostics.push(Diagnostic::new(
                        DIAG_STYLE_COMPILE,
                        format!("style compile error (region {}): {}", index, e.message),
                    ));
                    region.raw_content.clone()
                }
            },
        };

        if css.trim().is_empty() {
            continue;
        }
        if region.is_global {
            global.push(css);
        } else {
            scoped.push(css);
        }
    }

    let join = |parts: Vec<String>| {
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    };

    PreprocessedStyles {
        scoped_css: join(scoped),
        global_css: join(global),
        diagnostics,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILT-IN NESTED DIALECT
// ═══════════════════════════════════════════════════════════════════════════════

/// Built-in compiler for the nested dialect: `$variables`, nested rules with
/// `&` parent references, `//` line comments and nested conditional at-rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedCssCompiler;

impl StyleCompiler for NestedCssCompiler {
    fn compile(&self, source: &str, _region: &StyleRegion) -> Result<String, StyleCompileError> {
        let cleaned = strip_comments(source);
        let mut parser = BlockParser {
            chars: cleaned.chars().collect(),
            pos: 0,
        };
        let nodes = parser.parse_block(false)?;

        let mut vars = HashMap::new();
        let mut out = Vec::new();
        flatten(&nodes, &[], &mut vars, &mut out)?;
        Ok(out.join("").trim_end().to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CssNode {
    Variable(String, String),
    Declaration(String),
    Statement(String),
    Rule { prelude: String, children: Vec<CssNode> },
}

/// Remove `/* */` and `//` comments outside of strings. `//` only starts a
/// comment at a token boundary so `url(http://...)` survives.
fn strip_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    let mut in_string: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];

        if let Some(quote) = in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        if c == '"' || c == '\'' {
            in_string = Some(c);
            out.push(c);
            i += 1;
            continue;
        }

        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i += 2;
            continue;
        }

        let at_boundary = i == 0 || matches!(chars[i - 1], ' ' | '\t' | '\n' | '\r' | ';' | '{' | '}');
        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '/' && at_boundary {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

struct BlockParser {
    chars: Vec<char>,
    pos: usize,
}

impl BlockParser {
    fn parse_block(&mut self, nested: bool) -> Result<Vec<CssNode>, StyleCompileError> {
        let mut nodes = Vec::new();
        let mut buf = String::new();
        let mut paren_depth = 0usize;

        loop {
            let Some(&c) = self.chars.get(self.pos) else {
                if nested {
                    return Err(StyleCompileError::new("unclosed block: missing '}'"));
                }
                push_statement(&mut nodes, &buf);
                return Ok(nodes);
            };

            match c {
                '"' | '\'' => {
                    buf.push(c);
                    self.pos += 1;
                    while let Some(&s) = self.chars.get(self.pos) {
                        buf.push(s);
                        self.pos += 1;
                        if s == '\\' {
                            if let Some(&escaped) = self.chars.get(self.pos) {
                                buf.push(escaped);
                                self.pos += 1;
                            }
                        } else if s == c {
                            break;
                        }
                    }
                    continue;
                }
                '(' => paren_depth += 1,
                ')' => paren_depth = paren_depth.saturating_sub(1),
                '{' if paren_depth == 0 => {
                    self.pos += 1;
                    let prelude = buf.trim().to_string();
                    buf.clear();
                    if prelude.is_empty() {
                        return Err(StyleCompileError::new("block without a selector"));
                    }
                    let children = self.parse_block(true)?;
                    nodes.push(CssNode::Rule { prelude, children });
                    continue;
                }
                '}' if paren_depth == 0 => {
                    self.pos += 1;
                    if !nested {
                        return Err(StyleCompileError::new("unexpected '}'"));
                    }
                    push_statement(&mut nodes, &buf);
                    return Ok(nodes);
                }
                ';' if paren_depth == 0 => {
                    self.pos += 1;
                    push_statement(&mut nodes, &buf);
                    buf.clear();
                    continue;
                }
                _ => {}
            }

            buf.push(c);
            self.pos += 1;
        }
    }
}

fn push_statement(nodes: &mut Vec<CssNode>, raw: &str) {
    let text = raw.trim();
    if text.is_empty() {
        return;
    }
    if let Some(rest) = text.strip_prefix('$') {
        if let Some((name, value)) = rest.split_once(':') {
            nodes.push(CssNode::Variable(
                name.trim().to_string(),
                value.trim().to_string(),
            ));
            return;
        }
    }
    if text.starts_with('@') {
        nodes.push(CssNode::Statement(text.to_string()));
    } else {
        nodes.push(CssNode::Declaration(text.to_string()));
    }
}

fn substitute(text: &str, vars: &HashMap<String, String>) -> Result<String, StyleCompileError> {
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for caps in VARIABLE_RE.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = vars
            .get(name.as_str())
            .ok_or_else(|| StyleCompileError::new(format!("undefined variable ${}", name.as_str())))?;
        result.push_str(&text[last..whole.start()]);
        result.push_str(value);
        last = whole.end();
    }
    result.push_str(&text[last..]);
    Ok(result)
}

/// Split a selector list on top-level commas.
fn split_selector_list(selector: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in selector.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn resolve_selectors(parents: &[String], selector: &str) -> Vec<String> {
    let children = split_selector_list(selector);
    if parents.is_empty() {
        return children.into_iter().map(|c| c.replace('&', "")).collect();
    }

    let mut resolved = Vec::new();
    for parent in parents {
        for child in &children {
            if child.contains('&') {
                resolved.push(child.replace('&', parent));
            } else {
                resolved.push(format!("{} {}", parent, child));
            }
        }
    }
    resolved
}

fn at_rule_name(prelude: &str) -> &str {
    prelude
        .trim_start_matches('@')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
}

fn flatten(
    nodes: &[CssNode],
    parents: &[String],
    vars: &mut HashMap<String, String>,
    out: &mut Vec<String>,
) -> Result<(), StyleCompileError> {
    let mut declarations = Vec::new();
    let mut deferred = Vec::new();

    for node in nodes {
        match node {
            CssNode::Variable(name, value) => {
                let value = substitute(value, vars)?;
                vars.insert(name.clone(), value);
            }
            CssNode::Declaration(decl) => {
                if parents.is_empty() {
                    return Err(StyleCompileError::new(format!(
                        "declaration `{}` outside of a rule",
                        decl
                    )));
                }
                declarations.push(substitute(decl, vars)?);
            }
            CssNode::Statement(stmt) => {
                out.push(format!("{};\n", substitute(stmt, vars)?));
            }
            CssNode::Rule { prelude, children } if prelude.starts_with('@') => {
                let prelude = substitute(prelude, vars)?;
                let mut scoped_vars = vars.clone();
                let body = if CONDITIONAL_AT_RULES.contains(&at_rule_name(&prelude)) {
                    let mut inner = Vec::new();
                    flatten(children, parents, &mut scoped_vars, &mut inner)?;
                    inner.join("")
                } else {
                    render_verbatim(children, &mut scoped_vars)?
                };
                deferred.push(format!("{} {{\n{}}}\n", prelude, body));
            }
            CssNode::Rule { prelude, children } => {
                let selectors = resolve_selectors(parents, &substitute(prelude, vars)?);
                let mut scoped_vars = vars.clone();
                flatten(children, &selectors, &mut scoped_vars, &mut deferred)?;
            }
        }
    }

    if !declarations.is_empty() {
        let body: String = declarations.iter().map(|d| format!("  {};\n", d)).collect();
        out.push(format!("{} {{\n{}}}\n", parents.join(", "), body));
    }
    out.extend(deferred);
    Ok(())
}

/// Render at-rule bodies such as `@keyframes` without selector resolution.
fn render_verbatim(
    nodes: &[CssNode],
    vars: &mut HashMap<String, String>,
) -> Result<String, StyleCompileError> {
    let mut out = String::new();
    for node in nodes {
        match node {
            CssNode::Variable(name, value) => {
                let value = substitute(value, vars)?;
                vars.insert(name.clone(), value);
            }
            CssNode::Declaration(decl) | CssNode::Statement(decl) => {
                out.push_str(&format!("  {};\n", substitute(decl, vars)?));
            }
            CssNode::Rule { prelude, children } => {
                let body = render_verbatim(children, vars)?;
                out.push_str(&format!("{} {{\n{}}}\n", substitute(prelude, vars)?, body));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(content: &str, attrs: &[(&str, &str)]) -> StyleRegion {
        let attributes: BTreeMap<String, String> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let (is_global, dialect) = classify_region(&attributes, &CompileOptions::default());
        StyleRegion {
            raw_content: content.to_string(),
            attributes,
            is_global,
            dialect,
            line: 1,
        }
    }

    fn compile(source: &str) -> Result<String, StyleCompileError> {
        NestedCssCompiler.compile(source, &region(source, &[("lang", "scss")]))
    }

    #[test]
    fn test_classification() {
        assert!(region("", &[("global", "true")]).is_global);
        assert!(!region("", &[("global", "false")]).is_global);
        assert_eq!(region("", &[("lang", "scss")]).dialect, StyleDialect::Extended);
        assert_eq!(region("", &[("lang", "css")]).dialect, StyleDialect::Plain);
    }

    #[test]
    fn test_partition_never_mixes() {
        let regions = vec![
            region(".a { color: red; }", &[]),
            region("body { margin: 0; }", &[("global", "true")]),
        ];
        let styles = preprocess_styles(&regions, &NestedCssCompiler);
        let scoped = styles.scoped_css.unwrap();
        let global = styles.global_css.unwrap();
        assert!(scoped.contains(".a") && !scoped.contains("body"));
        assert!(global.contains("body") && !global.contains(".a"));
        assert!(styles.diagnostics.is_empty());
    }

    #[test]
    fn test_same_class_joined_in_source_order() {
        let regions = vec![region(".first {}", &[]), region(".second {}", &[])];
        let styles = preprocess_styles(&regions, &NestedCssCompiler);
        assert_eq!(styles.scoped_css.unwrap(), ".first {}\n.second {}");
        assert_eq!(styles.global_css, None);
    }

    #[test]
    fn test_nesting_and_parent_reference() {
        let css = compile(".card { color: red; .title { font-weight: bold; } &:hover { color: blue; } }")
            .unwrap();
        assert!(css.contains(".card {\n  color: red;\n}"));
        assert!(css.contains(".card .title {\n  font-weight: bold;\n}"));
        assert!(css.contains(".card:hover {\n  color: blue;\n}"));
    }

    #[test]
    fn test_variables_and_line_comments() {
        let css = compile("$brand: #f00; // primary\n.btn { color: $brand; background: url(http://x/y.png); }")
            .unwrap();
        assert!(css.contains("color: #f00;"));
        assert!(css.contains("url(http://x/y.png)"));
        assert!(!css.contains("primary"));
    }

    #[test]
    fn test_selector_lists_expand() {
        let css = compile(".a, .b { .c { top: 0; } }").unwrap();
        assert!(css.contains(".a .c, .b .c {"));
    }

    #[test]
    fn test_nested_media_keeps_selector() {
        let css = compile(".nav { @media (max-width: 600px) { display: none; } }").unwrap();
        assert!(css.contains("@media (max-width: 600px) {\n.nav {\n  display: none;\n}\n}"));
    }

    #[test]
    fn test_keyframes_rendered_verbatim() {
        let css = compile("@keyframes spin { from { opacity: 0; } to { opacity: 1; } }").unwrap();
        assert!(css.contains("@keyframes spin {\nfrom {\n  opacity: 0;\n}"));
    }

    #[test]
    fn test_errors() {
        assert!(compile(".a { color: red;").is_err());
        assert!(compile(".a { color: $missing; }").is_err());
        assert!(compile("}").is_err());
    }

    #[test]
    fn test_compile_failure_falls_back_with_diagnostic() {
        let regions = vec![region(".broken { color: $nope; }", &[("lang", "scss")])];
        let styles = preprocess_styles(&regions, &NestedCssCompiler);
        assert_eq!(styles.scoped_css.unwrap(), ".broken { color: $nope; }");
        assert_eq!(styles.diagnostics.len(), 1);
        assert_eq!(styles.diagnostics[0].code, DIAG_STYLE_COMPILE);
        assert!(styles.diagnostics[0].message.contains("$nope"));
    }
}
