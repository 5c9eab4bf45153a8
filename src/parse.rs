//! Parse Module for the SFC compiler
//!
//! Splits a single-file component into its logical regions: one template,
//! one behavior script, any number of style regions and an optional route
//! declaration. Extraction uses bounded, non-recursive patterns; every region
//! is optional and a missing one is never an error.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::Path;

use crate::config::CompileOptions;
use crate::error::{CompilerError, Result};
use crate::style::classify_region;

// ═══════════════════════════════════════════════════════════════════════════════
// PATTERNS
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    /// Opening and closing template tokens, used for depth counting
    static ref TEMPLATE_TOKEN_RE: Regex = Regex::new(r"(?i)<(/?)template(?:\s[^>]*)?>").unwrap();

    /// Script block regex
    static ref SCRIPT_REGEX: Regex =
        Regex::new(r"(?is)<script((?:\s[^>]*)?)>([\s\S]*?)</script>").unwrap();

    /// Style block regex, applied repeatedly over the masked source
    static ref STYLE_REGEX: Regex =
        Regex::new(r"(?is)<style((?:\s[^>]*)?)>([\s\S]*?)</style>").unwrap();

    /// Route declaration, self-closing or paired
    static ref ROUTE_REGEX: Regex =
        Regex::new(r"(?is)<route((?:\s(?:[^>/]|/[^>])*)?)(?:/>|>([\s\S]*?)</route>)").unwrap();

    /// Attribute regex for script/style tags (quoted, unquoted or boolean)
    static ref ATTR_REGEX: Regex = Regex::new(
        r#"(?i)([a-z0-9:_@.-]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^>\s"']+)))?"#
    )
    .unwrap();

    /// Route attributes are always double-quoted `name="value"` pairs
    static ref QUOTED_ATTR_REGEX: Regex =
        Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*"([^"]*)""#).unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUnit {
    pub path: String,
    pub raw_text: String,
}

impl SourceUnit {
    pub fn new(path: impl Into<String>, raw_text: impl Into<String>) -> Self {
        SourceUnit {
            path: path.into(),
            raw_text: raw_text.into(),
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw_text = fs::read_to_string(path)
            .map_err(|e| CompilerError::io(path.display().to_string(), e))?;
        Ok(SourceUnit::new(path.to_string_lossy(), raw_text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleDialect {
    Plain,
    Extended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleRegion {
    pub raw_content: String,
    pub attributes: BTreeMap<String, String>,
    pub is_global: bool,
    pub dialect: StyleDialect,
    /// 1-based line of the region content in the source unit
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptBlock {
    pub content: String,
    pub attributes: BTreeMap<String, String>,
    /// 1-based line of the first content character in the source unit
    pub line: usize,
}

impl ScriptBlock {
    pub fn lang(&self) -> &str {
        self.attributes.get("lang").map(String::as_str).unwrap_or("js")
    }

    pub fn is_typescript(&self) -> bool {
        matches!(self.lang(), "ts" | "tsx" | "typescript")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSet {
    pub template: String,
    pub template_line: usize,
    pub script: Option<ScriptBlock>,
    pub style_regions: Vec<StyleRegion>,
    pub route_attrs: Option<BTreeMap<String, String>>,
}

impl BlockSet {
    pub fn script_text(&self) -> &str {
        self.script.as_ref().map(|s| s.content.as_str()).unwrap_or("")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGION HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

struct TemplateRegion {
    outer: Range<usize>,
    inner: Range<usize>,
}

/// Locate the first template region, pairing its closing tag by depth so that
/// nested `<template>` elements inside the markup stay part of it.
fn find_template_region(source: &str) -> Option<TemplateRegion> {
    let mut depth = 0usize;
    let mut open: Option<(usize, usize)> = None;

    for caps in TEMPLATE_TOKEN_RE.captures_iter(source) {
        let m = caps.get(0)?;
        let closing = caps.get(1).map(|c| !c.as_str().is_empty()).unwrap_or(false);

        if !closing {
            if open.is_none() {
                open = Some((m.start(), m.end()));
            }
            depth += 1;
        } else if depth > 0 {
            depth -= 1;
            if depth == 0 {
                let (start, inner_start) = open?;
                return Some(TemplateRegion {
                    outer: start..m.end(),
                    inner: inner_start..m.start(),
                });
            }
        }
    }

    None
}

/// Replace every byte inside `ranges` with a space, keeping newlines so byte
/// offsets and line numbers of the remaining text are unchanged.
fn mask_ranges(source: &str, ranges: &[Range<usize>]) -> String {
    let mut bytes = source.as_bytes().to_vec();
    for range in ranges {
        for b in &mut bytes[range.clone()] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
    }
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

pub(crate) fn line_of(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())].matches('\n').count() + 1
}

/// Trim surrounding whitespace, reporting how many newlines were dropped in front.
fn trim_block(text: &str) -> (String, usize) {
    let trimmed_start = text.trim_start();
    let skipped = &text[..text.len() - trimmed_start.len()];
    (trimmed_start.trim_end().to_string(), skipped.matches('\n').count())
}

/// Parse tag attributes. Boolean attributes get the value `"true"`.
pub fn parse_attributes(attr_string: &str) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    for caps in ATTR_REGEX.captures_iter(attr_string) {
        if let Some(name) = caps.get(1) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "true".to_string());
            attributes.insert(name.as_str().to_lowercase(), value);
        }
    }
    attributes
}

/// Parse strictly double-quoted `name="value"` pairs.
pub fn parse_quoted_attributes(attr_string: &str) -> BTreeMap<String, String> {
    QUOTED_ATTR_REGEX
        .captures_iter(attr_string)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Split a source unit into its blocks.
pub fn extract_blocks(unit: &SourceUnit, options: &CompileOptions) -> BlockSet {
    let source = unit.raw_text.as_str();
    let mut masked_ranges = Vec::new();

    // Template
    let (template, template_line) = match find_template_region(source) {
        Some(region) => {
            let (text, skipped) = trim_block(&source[region.inner.clone()]);
            let line = line_of(source, region.inner.start) + skipped;
            masked_ranges.push(region.outer);
            (text, line)
        }
        None => (String::new(), 1),
    };

    // Script, searched outside the template so example markup cannot match
    let without_template = mask_ranges(source, &masked_ranges);
    let script = SCRIPT_REGEX.captures(&without_template).and_then(|caps| {
        let whole = caps.get(0)?;
        let content = caps.get(2)?;
        masked_ranges.push(whole.range());

        let (text, skipped) = trim_block(&source[content.range()]);
        Some(ScriptBlock {
            content: text,
            attributes: parse_attributes(caps.get(1).map(|m| m.as_str()).unwrap_or("")),
            line: line_of(source, content.start()) + skipped,
        })
    });

    // Styles, searched with both template and script excluded
    let masked = mask_ranges(source, &masked_ranges);
    let style_regions = STYLE_REGEX
        .captures_iter(&masked)
        .filter_map(|caps| {
            let content = caps.get(2)?;
            let attributes = parse_attributes(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
            let (is_global, dialect) = classify_region(&attributes, options);
            let (text, skipped) = trim_block(&source[content.range()]);
            Some(StyleRegion {
                raw_content: text,
                attributes,
                is_global,
                dialect,
                line: line_of(source, content.start()) + skipped,
            })
        })
        .collect();

    // Route
    let route_attrs = ROUTE_REGEX
        .captures(&masked)
        .map(|caps| parse_quoted_attributes(caps.get(1).map(|m| m.as_str()).unwrap_or("")));

    BlockSet {
        template,
        template_line,
        script,
        style_regions,
        route_attrs,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> BlockSet {
        extract_blocks(
            &SourceUnit::new("src/x-card.sfc", source),
            &CompileOptions::default(),
        )
    }

    #[test]
    fn test_all_regions() {
        let blocks = extract(
            r#"<route path="/users/:id" />
<template>
  <h1>User {{id}}</h1>
</template>
<script lang="ts">
export default { tag: 'user-page' };
</script>
<style>h1 { color: red; }</style>
<style global>body { margin: 0; }</style>"#,
        );

        assert_eq!(blocks.template, "<h1>User {{id}}</h1>");
        assert_eq!(blocks.template_line, 3);
        let script = blocks.script.unwrap();
        assert!(script.content.starts_with("export default"));
        assert!(script.is_typescript());
        assert_eq!(script.line, 6);
        assert_eq!(blocks.style_regions.len(), 2);
        assert!(!blocks.style_regions[0].is_global);
        assert!(blocks.style_regions[1].is_global);
        assert_eq!(
            blocks.route_attrs.unwrap().get("path"),
            Some(&"/users/:id".to_string())
        );
    }

    #[test]
    fn test_missing_regions_are_not_errors() {
        let blocks = extract("<style>p {}</style>");
        assert_eq!(blocks.template, "");
        assert!(blocks.script.is_none());
        assert!(blocks.route_attrs.is_none());
        assert_eq!(blocks.style_regions.len(), 1);
    }

    #[test]
    fn test_style_inside_template_is_not_a_region() {
        let blocks = extract(
            "<template><pre><style>.demo {}</style></pre></template>\n<style>.real {}</style>",
        );
        assert_eq!(blocks.style_regions.len(), 1);
        assert_eq!(blocks.style_regions[0].raw_content, ".real {}");
        assert!(blocks.template.contains(".demo"));
    }

    #[test]
    fn test_style_inside_script_is_not_a_region() {
        let blocks = extract(
            "<script>const s = `<style>.fake {}</style>`;</script>\n<style>.real {}</style>",
        );
        assert_eq!(blocks.style_regions.len(), 1);
        assert_eq!(blocks.style_regions[0].raw_content, ".real {}");
    }

    #[test]
    fn test_script_inside_template_is_ignored() {
        let blocks = extract(
            "<template><script>inline()</script></template><script>export default {}</script>",
        );
        assert_eq!(blocks.script.unwrap().content, "export default {}");
    }

    #[test]
    fn test_nested_template_elements() {
        let blocks = extract("<template><template id=\"row\"><tr></tr></template><p>x</p></template>");
        assert_eq!(
            blocks.template,
            "<template id=\"row\"><tr></tr></template><p>x</p>"
        );
    }

    #[test]
    fn test_paired_route_tag() {
        let blocks = extract(
            r#"<route path="/old" redirect="/new" redirect-method="replace"></route><template></template>"#,
        );
        let attrs = blocks.route_attrs.unwrap();
        assert_eq!(attrs.get("redirect"), Some(&"/new".to_string()));
        assert_eq!(attrs.get("redirect-method"), Some(&"replace".to_string()));
    }

    #[test]
    fn test_route_prefix_tag_is_not_a_route() {
        let blocks = extract("<route-link href=\"/\"></route-link>");
        assert!(blocks.route_attrs.is_none());
    }

    #[test]
    fn test_parse_attributes() {
        let attrs = parse_attributes(r#" lang="scss" global data-x='1' media=print"#);
        assert_eq!(attrs.get("lang"), Some(&"scss".to_string()));
        assert_eq!(attrs.get("global"), Some(&"true".to_string()));
        assert_eq!(attrs.get("data-x"), Some(&"1".to_string()));
        assert_eq!(attrs.get("media"), Some(&"print".to_string()));
    }

    #[test]
    fn test_mask_preserves_offsets() {
        let masked = mask_ranges("ab\ncd\nef", &[1..5]);
        assert_eq!(masked, "a \n  \nef");
    }
}
