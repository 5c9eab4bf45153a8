//! Annotation Extractor
//!
//! Finds method annotations (`@click(".btn")`, `@debounce(300)`, ...) in a
//! behavior script, removes them so the script stays valid for type
//! stripping, and appends statements that attach the equivalent metadata to
//! the annotated methods at module evaluation.
//!
//! Extraction is a chain of strategies tried in order:
//!
//! 1. `TreeStrategy` parses the script as TypeScript and reads class method
//!    decorators straight from the syntax tree.
//! 2. `MarkerStrategy` rewrites every annotation into a marker comment so that
//!    object-literal methods (where decorators are not valid syntax) parse,
//!    then pairs markers with the methods that follow them.
//! 3. `StripStrategy` blanks annotation syntax without producing metadata.
//!    It never fails.
//!
//! Every rewrite keeps the line structure of the script intact.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BindingPattern, Class, ClassElement, Declaration, ExportDefaultDeclarationKind, Expression,
    ModuleExportName, ObjectExpression, ObjectPropertyKind, Program, Statement,
    VariableDeclaration,
};
use oxc_parser::Parser;
use oxc_span::GetSpan;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;

use crate::error::{Diagnostic, DIAG_ANNOTATION_FALLBACK};
use crate::script::parse_source_type;

/// Binding given to anonymous default exports so metadata can be attached.
pub const DEFAULT_OWNER: &str = "__SfcDefault";

/// Name of the generated static annotation table export.
pub const ANNOTATION_TABLE: &str = "__sfcAnnotations";

pub const DEFAULT_TIMING_DELAY_MS: u64 = 200;

pub const EVENT_ANNOTATIONS: &[&str] = &[
    "click",
    "dblclick",
    "input",
    "change",
    "submit",
    "reset",
    "keydown",
    "keyup",
    "keypress",
    "focus",
    "blur",
    "focusin",
    "focusout",
    "mouseenter",
    "mouseleave",
    "mouseover",
    "mouseout",
    "mousedown",
    "mouseup",
    "mousemove",
    "pointerdown",
    "pointerup",
    "pointermove",
    "touchstart",
    "touchend",
    "touchmove",
    "scroll",
    "wheel",
    "contextmenu",
    "dragstart",
    "dragend",
    "drop",
];

pub const TIMING_ANNOTATIONS: &[&str] = &["debounce", "throttle"];

lazy_static! {
    static ref MARKER_RE: Regex =
        Regex::new(r"/\*@sfc:([A-Za-z_$][A-Za-z0-9_$.]*):([0-9A-Za-z]*)\*/").unwrap();
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// METADATA TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnnotationKind {
    Event {
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Timing {
        #[serde(rename = "timingType")]
        timing_type: String,
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    Unknown {
        #[serde(default)]
        args: Vec<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationMetadata {
    pub method_name: String,
    /// Annotation name as written, without the `@`.
    pub name: String,
    #[serde(flatten)]
    pub kind: AnnotationKind,
}

impl AnnotationMetadata {
    /// Classify an annotation by name. Unrecognised names are kept as `Unknown`.
    pub fn classify(method_name: &str, name: &str, args: Vec<Value>) -> Self {
        let kind = if EVENT_ANNOTATIONS.contains(&name) {
            AnnotationKind::Event {
                event_type: name.to_string(),
                selector: args.first().and_then(Value::as_str).map(str::to_string),
            }
        } else if name == "on" && args.first().and_then(Value::as_str).is_some() {
            AnnotationKind::Event {
                event_type: args[0].as_str().unwrap_or_default().to_string(),
                selector: args.get(1).and_then(Value::as_str).map(str::to_string),
            }
        } else if TIMING_ANNOTATIONS.contains(&name) {
            let delay_ms = args
                .first()
                .and_then(Value::as_f64)
                .filter(|ms| *ms >= 0.0)
                .map(|ms| ms as u64)
                .unwrap_or(DEFAULT_TIMING_DELAY_MS);
            AnnotationKind::Timing {
                timing_type: name.to_string(),
                delay_ms,
            }
        } else {
            AnnotationKind::Unknown { args }
        };

        AnnotationMetadata {
            method_name: method_name.to_string(),
            name: name.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Tree,
    Marker,
    Strip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAnnotations {
    pub script: String,
    /// Every extracted annotation, whatever its owner.
    pub metadata: Vec<AnnotationMetadata>,
    /// The exported table: annotations of the default-export owner only.
    pub table: Vec<AnnotationMetadata>,
    pub strategy: StrategyKind,
    pub diagnostics: Vec<Diagnostic>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARGUMENT PARSING
// ═══════════════════════════════════════════════════════════════════════════════

/// Split an argument list on top-level commas. Commas inside quotes or
/// brackets belong to the argument.
pub fn parse_args(text: &str) -> Result<Vec<Value>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if let Some(q) = quote {
        return Err(format!("unterminated {} string in annotation arguments", q));
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }

    Ok(parts.iter().map(|p| arg_value(p.trim())).collect())
}

fn arg_value(raw: &str) -> Value {
    let quoted = raw.len() >= 2
        && ["\"", "'", "`"]
            .iter()
            .any(|q| raw.starts_with(q) && raw.ends_with(q));
    if quoted {
        return Value::String(unescape(&raw[1..raw.len() - 1]));
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(float) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// LEXICAL SCAN
// ═══════════════════════════════════════════════════════════════════════════════

/// One `@name(args)` occurrence found by the lexical scan.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Occurrence {
    range: Range<usize>,
    name: String,
    args_text: String,
}

/// Scan code (skipping strings, template literals and comments) for
/// annotations that start a token.
fn scan_annotations(script: &str) -> Vec<Occurrence> {
    let bytes = script.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            q @ (b'"' | b'\'' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != q {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'@' => {
                let boundary = i == 0
                    || matches!(bytes[i - 1], b' ' | b'\t' | b'\n' | b'\r' | b'{' | b'}' | b',' | b';');
                match boundary.then(|| read_annotation(script, i)).flatten() {
                    Some(occurrence) => {
                        i = occurrence.range.end;
                        found.push(occurrence);
                    }
                    None => i += 1,
                }
            }
            _ => i += 1,
        }
    }

    found
}

fn read_annotation(script: &str, at: usize) -> Option<Occurrence> {
    let bytes = script.as_bytes();
    let name_start = at + 1;
    let mut end = name_start;
    while end < bytes.len()
        && (bytes[end].is_ascii_alphanumeric() || matches!(bytes[end], b'_' | b'$' | b'.'))
    {
        end += 1;
    }
    let name = &script[name_start..end];
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let mut args_text = String::new();
    if bytes.get(end) == Some(&b'(') {
        if let Some(close) = matching_paren(script, end) {
            args_text = script[end + 1..close].to_string();
            end = close + 1;
        }
    }

    Some(Occurrence {
        range: at..end,
        name: name.to_string(),
        args_text,
    })
}

fn matching_paren(script: &str, open: usize) -> Option<usize> {
    let bytes = script.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            q @ (b'"' | b'\'' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != q {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Blank a range, keeping newlines.
fn blank(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\n' || c == '\r' { c } else { ' ' })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// OWNER ANALYSIS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct FoundAnnotation {
    name: String,
    args: Result<Vec<Value>, String>,
    /// Range in the original script removed from the output.
    range: Range<usize>,
}

#[derive(Debug, Clone)]
struct MethodInfo {
    name: String,
    is_static: bool,
    /// Instance class field holding a function. It has no prototype slot,
    /// so its entries only go to the annotation table.
    instance_field: bool,
    annotations: Vec<FoundAnnotation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnerKind {
    Class,
    Object,
}

/// Rewrite that binds an anonymous default export to `DEFAULT_OWNER`.
#[derive(Debug, Clone)]
enum AnonymousDefault {
    /// Insert the binding name after the `class` keyword.
    Class { insert_at: usize },
    /// Replace `export default` with a const binding and re-export at the end.
    Object { replace: Range<usize> },
}

#[derive(Debug, Clone)]
struct OwnerInfo {
    name: String,
    kind: OwnerKind,
    anonymous_default: Option<AnonymousDefault>,
    methods: Vec<MethodInfo>,
}

impl OwnerInfo {
    fn is_annotated(&self) -> bool {
        self.methods.iter().any(|m| !m.annotations.is_empty())
    }
}

/// Source of per-method annotations for the owner walk.
trait MemberAnnotations {
    fn class_member(
        &mut self,
        decorators: &[oxc_ast::ast::Decorator],
        leading: Range<usize>,
    ) -> Vec<FoundAnnotation>;
    fn object_method(&mut self, leading: Range<usize>) -> Vec<FoundAnnotation>;
    /// Map an offset in the parsed text back to the original script.
    fn to_original(&self, pos: usize) -> usize;
}

struct OwnerWalk<'f> {
    finder: &'f mut dyn MemberAnnotations,
    parsed: &'f str,
    owners: Vec<OwnerInfo>,
    default_owner: Option<String>,
    /// Annotations on class members that cannot carry metadata.
    stray: Vec<Range<usize>>,
}

impl<'f> OwnerWalk<'f> {
    fn walk(&mut self, program: &Program) {
        for stmt in &program.body {
            match stmt {
                Statement::ClassDeclaration(class) => {
                    if let Some(id) = &class.id {
                        self.class_owner(id.name.to_string(), class, None);
                    }
                }
                Statement::VariableDeclaration(var) => self.variable_owners(var),
                Statement::ExportNamedDeclaration(export) => {
                    match &export.declaration {
                        Some(Declaration::ClassDeclaration(class)) => {
                            if let Some(id) = &class.id {
                                self.class_owner(id.name.to_string(), class, None);
                            }
                        }
                        Some(Declaration::VariableDeclaration(var)) => self.variable_owners(var),
                        _ => {}
                    }
                    for spec in &export.specifiers {
                        if export_name(&spec.exported) == "default" && export.source.is_none() {
                            self.default_owner = Some(export_name(&spec.local));
                        }
                    }
                }
                Statement::ExportDefaultDeclaration(export) => match &export.declaration {
                    ExportDefaultDeclarationKind::ClassDeclaration(class) => match &class.id {
                        Some(id) => {
                            self.default_owner = Some(id.name.to_string());
                            self.class_owner(id.name.to_string(), class, None);
                        }
                        None => {
                            let start = class.span.start as usize;
                            let keyword = self.parsed[start..]
                                .find("class")
                                .map(|offset| start + offset + "class".len())
                                .unwrap_or(start);
                            let insert_at = self.finder.to_original(keyword);
                            self.default_owner = Some(DEFAULT_OWNER.to_string());
                            self.class_owner(
                                DEFAULT_OWNER.to_string(),
                                class,
                                Some(AnonymousDefault::Class { insert_at }),
                            );
                        }
                    },
                    ExportDefaultDeclarationKind::ObjectExpression(obj) => {
                        let replace = self.finder.to_original(export.span.start as usize)
                            ..self.finder.to_original(obj.span.start as usize);
                        self.default_owner = Some(DEFAULT_OWNER.to_string());
                        self.object_owner(
                            DEFAULT_OWNER.to_string(),
                            obj,
                            Some(AnonymousDefault::Object { replace }),
                        );
                    }
                    ExportDefaultDeclarationKind::Identifier(id) => {
                        self.default_owner = Some(id.name.to_string());
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    fn variable_owners(&mut self, var: &VariableDeclaration) {
        for declarator in &var.declarations {
            let (BindingPattern::BindingIdentifier(id), Some(init)) =
                (&declarator.id, &declarator.init)
            else {
                continue;
            };
            match init {
                Expression::ObjectExpression(obj) => {
                    self.object_owner(id.name.to_string(), obj, None)
                }
                Expression::ClassExpression(class) => {
                    self.class_owner(id.name.to_string(), class, None)
                }
                _ => {}
            }
        }
    }

    fn class_owner(&mut self, name: String, class: &Class, anonymous: Option<AnonymousDefault>) {
        let mut methods = Vec::new();
        let mut prev_end = class.body.span.start as usize + 1;

        let class_level = self.finder.class_member(&class.decorators, 0..0);
        self.stray.extend(class_level.into_iter().map(|found| found.range));

        for element in &class.body.body {
            let span = element.span();
            let leading = prev_end..span.start as usize;
            match element {
                ClassElement::MethodDefinition(method) => {
                    let annotations = self.finder.class_member(&method.decorators, leading);
                    match method.key.static_name() {
                        Some(method_name) => methods.push(MethodInfo {
                            name: method_name.to_string(),
                            is_static: method.r#static,
                            instance_field: false,
                            annotations,
                        }),
                        None => self.stray.extend(annotations.into_iter().map(|found| found.range)),
                    }
                }
                ClassElement::PropertyDefinition(prop) => {
                    let annotations = self.finder.class_member(&prop.decorators, leading);
                    let is_function = matches!(
                        prop.value,
                        Some(Expression::FunctionExpression(_) | Expression::ArrowFunctionExpression(_))
                    );
                    match (is_function, prop.key.static_name()) {
                        (true, Some(field_name)) => methods.push(MethodInfo {
                            name: field_name.to_string(),
                            is_static: prop.r#static,
                            instance_field: !prop.r#static,
                            annotations,
                        }),
                        _ => self.stray.extend(annotations.into_iter().map(|found| found.range)),
                    }
                }
                ClassElement::AccessorProperty(accessor) => {
                    let annotations = self.finder.class_member(&accessor.decorators, leading);
                    self.stray.extend(annotations.into_iter().map(|found| found.range));
                }
                _ => {}
            }
            prev_end = span.end as usize;
        }

        self.owners.push(OwnerInfo {
            name,
            kind: OwnerKind::Class,
            anonymous_default: anonymous,
            methods,
        });
    }

    fn object_owner(
        &mut self,
        name: String,
        obj: &ObjectExpression,
        anonymous: Option<AnonymousDefault>,
    ) {
        let mut methods = Vec::new();
        let mut prev_end = obj.span.start as usize + 1;

        for property in &obj.properties {
            let span = property.span();
            if let ObjectPropertyKind::ObjectProperty(prop) = property {
                let is_function = prop.method
                    || matches!(
                        prop.value,
                        Expression::FunctionExpression(_) | Expression::ArrowFunctionExpression(_)
                    );
                if let (true, Some(method_name)) = (is_function, prop.key.static_name()) {
                    let annotations = self.finder.object_method(prev_end..span.start as usize);
                    methods.push(MethodInfo {
                        name: method_name.to_string(),
                        is_static: false,
                        instance_field: false,
                        annotations,
                    });
                }
            }
            prev_end = span.end as usize;
        }

        self.owners.push(OwnerInfo {
            name,
            kind: OwnerKind::Object,
            anonymous_default: anonymous,
            methods,
        });
    }
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::IdentifierName(id) => id.name.to_string(),
        ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        ModuleExportName::StringLiteral(s) => s.value.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERING
// ═══════════════════════════════════════════════════════════════════════════════

fn member_access(name: &str) -> String {
    if IDENT_RE.is_match(name) {
        format!(".{}", name)
    } else {
        format!(
            "[{}]",
            serde_json::to_string(name).unwrap_or_else(|_| format!("\"{}\"", name))
        )
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

/// Apply removals and owner rewrites to the original script and append the
/// metadata statements.
fn render(
    original: &str,
    owners: &[OwnerInfo],
    default_owner: Option<&str>,
    extra_removals: &[Range<usize>],
    diagnostics: &mut Vec<Diagnostic>,
) -> (String, Vec<AnnotationMetadata>, Vec<AnnotationMetadata>) {
    let mut edits: Vec<(usize, usize, String)> = Vec::new();
    let mut metadata = Vec::new();
    let mut assignments = Vec::new();
    let mut table = Vec::new();
    let mut reexport_default = false;
    let mut removed: Vec<Range<usize>> = Vec::new();

    for owner in owners.iter().filter(|o| o.is_annotated()) {
        match &owner.anonymous_default {
            Some(AnonymousDefault::Class { insert_at }) => {
                edits.push((*insert_at, *insert_at, format!(" {}", DEFAULT_OWNER)));
            }
            Some(AnonymousDefault::Object { replace }) => {
                let newlines: String = original[replace.clone()]
                    .chars()
                    .filter(|c| *c == '\n')
                    .collect();
                edits.push((
                    replace.start,
                    replace.end,
                    format!("const {} = {}", DEFAULT_OWNER, newlines),
                ));
                reexport_default = true;
            }
            None => {}
        }

        for method in owner.methods.iter().filter(|m| !m.annotations.is_empty()) {
            let mut entries = Vec::new();
            for found in &method.annotations {
                removed.push(found.range.clone());
                match &found.args {
                    Ok(args) => entries.push(AnnotationMetadata::classify(
                        &method.name,
                        &found.name,
                        args.clone(),
                    )),
                    Err(e) => {
                        log::warn!("[sfc] dropping @{} on {}: {}", found.name, method.name, e);
                        diagnostics.push(Diagnostic::new(
                            DIAG_ANNOTATION_FALLBACK,
                            format!("@{} on `{}` dropped: {}", found.name, method.name, e),
                        ));
                    }
                }
            }
            if entries.is_empty() {
                continue;
            }

            let target = match (owner.kind, method.is_static) {
                _ if method.instance_field => None,
                (OwnerKind::Class, false) => Some(format!(
                    "{}.prototype{}",
                    owner.name,
                    member_access(&method.name)
                )),
                _ => Some(format!("{}{}", owner.name, member_access(&method.name))),
            };
            if let Some(target) = target {
                assignments.push(format!("{}.__metadata = {};", target, to_json(&entries)));
            }

            if default_owner.map_or(true, |d| d == owner.name) {
                table.extend(entries.iter().cloned());
            }
            metadata.extend(entries);
        }
    }

    for range in extra_removals {
        if !removed.iter().any(|r| r.start == range.start) {
            removed.push(range.clone());
        }
    }
    for range in removed {
        edits.push((range.start, range.end, blank(&original[range])));
    }

    if edits.is_empty() && metadata.is_empty() {
        return (original.to_string(), metadata, table);
    }

    edits.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    let mut script = original.to_string();
    for (start, end, replacement) in edits {
        script.replace_range(start..end, &replacement);
    }

    if !metadata.is_empty() {
        if !script.ends_with('\n') {
            script.push('\n');
        }
        script.push('\n');
        for assignment in &assignments {
            script.push_str(assignment);
            script.push('\n');
        }
        script.push_str(&format!("export const {} = {};\n", ANNOTATION_TABLE, to_json(&table)));
        if reexport_default {
            script.push_str(&format!("export default {};\n", DEFAULT_OWNER));
        }
    }

    (script, metadata, table)
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRATEGIES
// ═══════════════════════════════════════════════════════════════════════════════

pub trait AnnotationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn extract(&self, script: &str) -> Result<ExtractedAnnotations, String>;
}

/// Reads class method decorators from the TypeScript syntax tree.
pub struct TreeStrategy;

struct DecoratorFinder<'s> {
    script: &'s str,
}

impl MemberAnnotations for DecoratorFinder<'_> {
    fn class_member(
        &mut self,
        decorators: &[oxc_ast::ast::Decorator],
        _leading: Range<usize>,
    ) -> Vec<FoundAnnotation> {
        decorators
            .iter()
            .map(|decorator| {
                let mut start = decorator.span.start as usize;
                if !self.script[start..].starts_with('@') && self.script[..start].ends_with('@') {
                    start -= 1;
                }
                let range = start..decorator.span.end as usize;
                let (name, args) = match &decorator.expression {
                    Expression::CallExpression(call) => {
                        let callee = call.callee.span();
                        let name = &self.script[callee.start as usize..callee.end as usize];
                        let args = match (call.arguments.first(), call.arguments.last()) {
                            (Some(first), Some(last)) => parse_args(
                                &self.script[first.span().start as usize..last.span().end as usize],
                            ),
                            _ => Ok(Vec::new()),
                        };
                        (name.to_string(), args)
                    }
                    other => {
                        let span = other.span();
                        (
                            self.script[span.start as usize..span.end as usize].to_string(),
                            Ok(Vec::new()),
                        )
                    }
                };
                FoundAnnotation { name, args, range }
            })
            .collect()
    }

    fn object_method(&mut self, _leading: Range<usize>) -> Vec<FoundAnnotation> {
        Vec::new()
    }

    fn to_original(&self, pos: usize) -> usize {
        pos
    }
}

impl AnnotationStrategy for TreeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Tree
    }

    fn extract(&self, script: &str) -> Result<ExtractedAnnotations, String> {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, script, parse_source_type()).parse();
        if ret.panicked || !ret.errors.is_empty() {
            return Err(format!("{} parse error(s)", ret.errors.len().max(1)));
        }

        let mut finder = DecoratorFinder { script };
        let mut walk = OwnerWalk {
            finder: &mut finder,
            parsed: script,
            owners: Vec::new(),
            default_owner: None,
            stray: Vec::new(),
        };
        walk.walk(&ret.program);
        let (owners, default_owner, stray) = (walk.owners, walk.default_owner, walk.stray);
        for range in &stray {
            log::debug!("[sfc] removing annotation with no method: {}", &script[range.clone()]);
        }

        let mut diagnostics = Vec::new();
        let (script, metadata, table) = render(
            script,
            &owners,
            default_owner.as_deref(),
            &stray,
            &mut diagnostics,
        );

        Ok(ExtractedAnnotations {
            script,
            metadata,
            table,
            strategy: StrategyKind::Tree,
            diagnostics,
        })
    }
}

/// Replaces annotations with `/*@sfc:<name>:<hex args>*/` markers, parses the
/// marked script and pairs each marker with the method that follows it.
pub struct MarkerStrategy;

#[derive(Debug, Clone)]
struct MarkerSpan {
    marked: Range<usize>,
    original: Range<usize>,
}

pub fn encode_marker(name: &str, args_text: &str) -> String {
    format!("/*@sfc:{}:{}*/", name, hex::encode(args_text.as_bytes()))
}

pub fn decode_marker(marker: &str) -> Option<Result<(String, Vec<Value>), String>> {
    let caps = MARKER_RE.captures(marker)?;
    let name = caps.get(1)?.as_str().to_string();
    let decoded = hex::decode(caps.get(2)?.as_str())
        .map_err(|e| e.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()))
        .and_then(|text| parse_args(&text));
    Some(decoded.map(|args| (name, args)))
}

struct MarkerFinder<'s> {
    marked: &'s str,
    markers: Vec<MarkerSpan>,
}

impl MarkerFinder<'_> {
    fn markers_in(&self, leading: Range<usize>) -> Vec<FoundAnnotation> {
        self.markers
            .iter()
            .filter(|m| m.marked.start >= leading.start && m.marked.end <= leading.end)
            .filter_map(|m| {
                let (name, args) = match decode_marker(&self.marked[m.marked.clone()])? {
                    Ok((name, args)) => (name, Ok(args)),
                    Err(e) => (marker_name(&self.marked[m.marked.clone()]), Err(e)),
                };
                Some(FoundAnnotation {
                    name,
                    args,
                    range: m.original.clone(),
                })
            })
            .collect()
    }
}

fn marker_name(marker: &str) -> String {
    marker
        .trim_start_matches("/*@sfc:")
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string()
}

impl MemberAnnotations for MarkerFinder<'_> {
    fn class_member(
        &mut self,
        _decorators: &[oxc_ast::ast::Decorator],
        leading: Range<usize>,
    ) -> Vec<FoundAnnotation> {
        self.markers_in(leading)
    }

    fn object_method(&mut self, leading: Range<usize>) -> Vec<FoundAnnotation> {
        self.markers_in(leading)
    }

    fn to_original(&self, pos: usize) -> usize {
        match self.markers.iter().rev().find(|m| m.marked.end <= pos) {
            Some(m) => pos - m.marked.end + m.original.end,
            None => pos,
        }
    }
}

impl AnnotationStrategy for MarkerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Marker
    }

    fn extract(&self, script: &str) -> Result<ExtractedAnnotations, String> {
        let occurrences = scan_annotations(script);

        let mut marked = String::with_capacity(script.len());
        let mut markers = Vec::with_capacity(occurrences.len());
        let mut last = 0;
        for occurrence in &occurrences {
            marked.push_str(&script[last..occurrence.range.start]);
            let start = marked.len();
            marked.push_str(&encode_marker(&occurrence.name, &occurrence.args_text));
            markers.push(MarkerSpan {
                marked: start..marked.len(),
                original: occurrence.range.clone(),
            });
            last = occurrence.range.end;
        }
        marked.push_str(&script[last..]);

        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &marked, parse_source_type()).parse();
        if ret.panicked || !ret.errors.is_empty() {
            return Err(format!(
                "marked script still has {} parse error(s)",
                ret.errors.len().max(1)
            ));
        }

        let mut finder = MarkerFinder {
            marked: &marked,
            markers,
        };
        let mut walk = OwnerWalk {
            finder: &mut finder,
            parsed: &marked,
            owners: Vec::new(),
            default_owner: None,
            stray: Vec::new(),
        };
        walk.walk(&ret.program);
        let (owners, default_owner) = (walk.owners, walk.default_owner);

        // Annotations that precede no method are removed all the same.
        let all: Vec<Range<usize>> = occurrences.iter().map(|o| o.range.clone()).collect();
        let mut diagnostics = Vec::new();
        let (script, metadata, table) = render(
            script,
            &owners,
            default_owner.as_deref(),
            &all,
            &mut diagnostics,
        );

        Ok(ExtractedAnnotations {
            script,
            metadata,
            table,
            strategy: StrategyKind::Marker,
            diagnostics,
        })
    }
}

/// Last resort: blank every annotation, no metadata.
pub struct StripStrategy;

impl AnnotationStrategy for StripStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Strip
    }

    fn extract(&self, script: &str) -> Result<ExtractedAnnotations, String> {
        let occurrences = scan_annotations(script);
        let mut stripped = script.to_string();
        for occurrence in occurrences.iter().rev() {
            let blanked = blank(&script[occurrence.range.clone()]);
            stripped.replace_range(occurrence.range.clone(), &blanked);
        }

        let diagnostics = if occurrences.is_empty() {
            Vec::new()
        } else {
            vec![Diagnostic::new(
                DIAG_ANNOTATION_FALLBACK,
                format!(
                    "{} annotation(s) removed without metadata; the script could not be parsed",
                    occurrences.len()
                ),
            )]
        };

        Ok(ExtractedAnnotations {
            script: stripped,
            metadata: Vec::new(),
            table: Vec::new(),
            strategy: StrategyKind::Strip,
            diagnostics,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXTRACTOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct AnnotationExtractor {
    strategies: Vec<Box<dyn AnnotationStrategy>>,
}

impl Default for AnnotationExtractor {
    fn default() -> Self {
        AnnotationExtractor {
            strategies: vec![
                Box::new(TreeStrategy),
                Box::new(MarkerStrategy),
                Box::new(StripStrategy),
            ],
        }
    }
}

impl AnnotationExtractor {
    pub fn with_strategies(strategies: Vec<Box<dyn AnnotationStrategy>>) -> Self {
        AnnotationExtractor { strategies }
    }

    /// Run the strategies in order and commit to the first success.
    pub fn extract(&self, script: &str) -> ExtractedAnnotations {
        for strategy in &self.strategies {
            match strategy.extract(script) {
                Ok(result) => return result,
                Err(e) => log::debug!(
                    "[sfc] annotation strategy {:?} failed: {}",
                    strategy.kind(),
                    e
                ),
            }
        }
        // Only reachable with a custom chain that lacks the strip strategy.
        StripStrategy
            .extract(script)
            .unwrap_or_else(|_| ExtractedAnnotations {
                script: script.to_string(),
                metadata: Vec::new(),
                table: Vec::new(),
                strategy: StrategyKind::Strip,
                diagnostics: Vec::new(),
            })
    }
}

pub fn extract_annotations(script: &str) -> ExtractedAnnotations {
    AnnotationExtractor::default().extract(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_class_shape_uses_tree() {
        let script = r#"export default class Counter extends HTMLElement {
  @click(".btn")
  increment() {}

  @debounce(300)
  @input
  search() {}

  @scroll
  static onScroll() {}
}"#;
        let result = extract_annotations(script);
        assert_eq!(result.strategy, StrategyKind::Tree);
        assert!(!result.script.contains('@'));
        assert!(result.script.lines().count() > script.lines().count());
        for (before, after) in script.lines().zip(result.script.lines()).skip(2) {
            if !before.contains('@') {
                assert_eq!(before, after);
            }
        }

        assert!(result
            .script
            .contains(r#"Counter.prototype.increment.__metadata = [{"methodName":"increment","name":"click","kind":"event","eventType":"click","selector":".btn"}];"#));
        assert!(result.script.contains("Counter.prototype.search.__metadata"));
        assert!(result.script.contains("Counter.onScroll.__metadata"));
        assert!(result.script.contains("export const __sfcAnnotations = ["));

        let search: Vec<_> = result
            .metadata
            .iter()
            .filter(|m| m.method_name == "search")
            .collect();
        assert_eq!(search.len(), 2);
        assert_eq!(
            search[0].kind,
            AnnotationKind::Timing {
                timing_type: "debounce".to_string(),
                delay_ms: 300
            }
        );
    }

    #[test]
    fn test_function_fields_and_stray_decorators() {
        let script = r#"export default class Counter extends HTMLElement {
  @click('.btn')
  handler = () => { this.count += 1; };
  @keydown
  static onKey = function () {};
  @track('x')
  count = 0;
  @debounce(300)
  search() {}
}"#;
        let result = extract_annotations(script);
        assert_eq!(result.strategy, StrategyKind::Tree);
        assert!(!result.script.contains('@'));
        assert!(!result.script.contains("Counter.prototype.handler"));
        assert!(result.script.contains("Counter.onKey.__metadata"));
        assert!(result.script.contains("Counter.prototype.search.__metadata"));
        assert!(result
            .script
            .contains(r#"{"methodName":"handler","name":"click","kind":"event","eventType":"click","selector":".btn"}"#));

        let names: Vec<_> = result.metadata.iter().map(|m| m.method_name.as_str()).collect();
        assert_eq!(names, vec!["handler", "onKey", "search"]);
        assert_eq!(script.lines().count() + 4, result.script.lines().count());
    }

    #[test]
    fn test_object_shape_uses_markers() {
        let script = r#"export default {
  tag: 'todo-list',
  @click('.add, .plus')
  add() {},
  @throttle
  onScroll: function () {},
};"#;
        let result = extract_annotations(script);
        assert_eq!(result.strategy, StrategyKind::Marker);
        assert!(!result.script.contains('@'));
        assert!(result.script.starts_with("const __SfcDefault = {"));
        assert!(result.script.trim_end().ends_with("export default __SfcDefault;"));
        assert!(result.script.contains("__SfcDefault.add.__metadata = "));
        assert!(result.script.contains("__SfcDefault.onScroll.__metadata = "));

        assert_eq!(
            result.metadata[0].kind,
            AnnotationKind::Event {
                event_type: "click".to_string(),
                selector: Some(".add, .plus".to_string())
            }
        );
        assert_eq!(
            result.metadata[1].kind,
            AnnotationKind::Timing {
                timing_type: "throttle".to_string(),
                delay_ms: DEFAULT_TIMING_DELAY_MS
            }
        );
    }

    #[test]
    fn test_anonymous_default_class_is_bound() {
        let result = extract_annotations("export default class extends Base {\n  @click\n  go() {}\n}");
        assert!(result
            .script
            .starts_with("export default class __SfcDefault extends Base {"));
        assert!(result.script.contains("__SfcDefault.prototype.go.__metadata"));
    }

    #[test]
    fn test_static_and_named_owners() {
        let result = extract_annotations(
            "class Panel {\n  @click static reset() {}\n}\nconst helpers = {\n  @keydown('input') type() {}\n};\nexport default Panel;",
        );
        assert!(result.script.contains("Panel.reset.__metadata"));
        assert!(result.script.contains("helpers.type.__metadata"));
        assert!(result
            .script
            .contains(r#"export const __sfcAnnotations = [{"methodName":"reset""#));
        assert!(!result.script.contains(r#"__sfcAnnotations = [{"methodName":"type""#));

        assert_eq!(result.metadata.len(), 2);
        let table: Vec<&str> = result.table.iter().map(|m| m.method_name.as_str()).collect();
        assert_eq!(table, vec!["reset"]);
    }

    #[test]
    fn test_idempotent_without_annotations() {
        for script in [
            "export default class A { go() { return 'a@b.com'; } }",
            "export default { tag: 'x-a', go() {} };",
            "export default { broken(",
        ] {
            let result = extract_annotations(script);
            assert_eq!(result.script, script);
            assert!(result.metadata.is_empty());
            assert!(result.diagnostics.is_empty());
        }

        let once = extract_annotations("export default { @click go() {} };");
        let twice = extract_annotations(&once.script);
        assert_eq!(twice.script, once.script);
        assert!(twice.metadata.is_empty());
    }

    #[test]
    fn test_strip_fallback_keeps_lines() {
        let script = "export default {\n  @click('.x')\n  go() { if ( }\n};";
        let result = extract_annotations(script);
        assert_eq!(result.strategy, StrategyKind::Strip);
        assert!(!result.script.contains("@click"));
        assert_eq!(result.script.lines().count(), script.lines().count());
        assert!(result.metadata.is_empty());
        assert_eq!(result.diagnostics[0].code, DIAG_ANNOTATION_FALLBACK);
    }

    #[test]
    fn test_unknown_and_generic_annotations() {
        let on = AnnotationMetadata::classify("m", "on", vec![json!("custom-evt"), json!(".item")]);
        assert_eq!(
            on.kind,
            AnnotationKind::Event {
                event_type: "custom-evt".to_string(),
                selector: Some(".item".to_string())
            }
        );
        let unknown = AnnotationMetadata::classify("m", "track", vec![json!("a"), json!(1)]);
        assert_eq!(
            unknown.kind,
            AnnotationKind::Unknown {
                args: vec![json!("a"), json!(1)]
            }
        );
    }

    #[test]
    fn test_parse_args_is_quote_aware() {
        assert_eq!(
            parse_args(r#"".a, .b", 300, 'it\'s', true"#).unwrap(),
            vec![json!(".a, .b"), json!(300), json!("it's"), json!(true)]
        );
        assert!(parse_args("'open").is_err());
        assert!(parse_args("").unwrap().is_empty());
    }

    #[test]
    fn test_marker_round_trip_and_bad_hex() {
        let marker = encode_marker("click", "'.btn'");
        let (name, args) = decode_marker(&marker).unwrap().unwrap();
        assert_eq!(name, "click");
        assert_eq!(args, vec![json!(".btn")]);
        assert!(decode_marker("/*@sfc:click:zz*/").unwrap().is_err());
    }

    #[test]
    fn test_scan_skips_strings_and_comments() {
        let found = scan_annotations("const s = '@click'; // @input\n/* @blur */ x, @focus(\")\")");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "focus");
        assert_eq!(found[0].args_text, "\")\"");
    }

    #[test]
    fn test_metadata_serialization() {
        let meta = AnnotationMetadata::classify("save", "debounce", vec![]);
        assert_eq!(
            serde_json::to_value(&meta).unwrap(),
            json!({"methodName": "save", "name": "debounce", "kind": "timing", "timingType": "debounce", "delayMs": 200})
        );
        let back: AnnotationMetadata = serde_json::from_value(serde_json::to_value(&meta).unwrap()).unwrap();
        assert_eq!(back, meta);
    }
}
