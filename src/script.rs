//! Behavior script analysis.
//!
//! Decides the authoring shape of the default export, infers the component
//! tag and strips TypeScript syntax for the companion script module.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BindingPattern, Declaration, ExportDefaultDeclarationKind, Expression, ModuleExportName,
    Statement,
};
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{CompilerError, Result};

lazy_static! {
    static ref TAG_RE: Regex =
        Regex::new(r#"\btag\s*[:=]\s*["'`]([a-z][a-z0-9]*(?:-[a-z0-9]+)+)["'`]"#).unwrap();
    static ref DEFAULT_CONSTRUCTOR_RE: Regex =
        Regex::new(r"\bexport\s+default\s+(?:abstract\s+)?(?:class|function)\b").unwrap();
    static ref DEFAULT_OBJECT_RE: Regex = Regex::new(r"\bexport\s+default\s*\{").unwrap();
    static ref DEFAULT_ANY_RE: Regex = Regex::new(r"\bexport\s+default\b").unwrap();
}

/// How the behavior script's default export must be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportShape {
    /// Class or function: passed to the registration function directly.
    Constructor,
    /// Plain configuration object: merged into registration options.
    Options,
    /// Not decidable statically; the generated module checks at runtime.
    Dynamic,
    /// No default export (or no script at all).
    Missing,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXPORT SHAPE
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn parse_source_type() -> SourceType {
    SourceType::default()
        .with_module(true)
        .with_typescript(true)
}

fn module_export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::IdentifierName(id) => id.name.to_string(),
        ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        ModuleExportName::StringLiteral(s) => s.value.to_string(),
    }
}

fn expression_shape(expr: &Expression, locals: &HashMap<String, ExportShape>) -> ExportShape {
    match expr {
        Expression::ObjectExpression(_) => ExportShape::Options,
        Expression::ClassExpression(_) | Expression::FunctionExpression(_) => {
            ExportShape::Constructor
        }
        Expression::ParenthesizedExpression(p) => expression_shape(&p.expression, locals),
        Expression::TSAsExpression(e) => expression_shape(&e.expression, locals),
        Expression::TSSatisfiesExpression(e) => expression_shape(&e.expression, locals),
        Expression::Identifier(id) => locals
            .get(id.name.as_str())
            .copied()
            .unwrap_or(ExportShape::Dynamic),
        _ => ExportShape::Dynamic,
    }
}

fn record_declaration(decl: &Declaration, locals: &mut HashMap<String, ExportShape>) {
    match decl {
        Declaration::ClassDeclaration(class) => {
            if let Some(id) = &class.id {
                locals.insert(id.name.to_string(), ExportShape::Constructor);
            }
        }
        Declaration::FunctionDeclaration(func) => {
            if let Some(id) = &func.id {
                locals.insert(id.name.to_string(), ExportShape::Constructor);
            }
        }
        Declaration::VariableDeclaration(var) => {
            for declarator in &var.declarations {
                if let BindingPattern::BindingIdentifier(id) = &declarator.id {
                    let shape = declarator
                        .init
                        .as_ref()
                        .map(|init| expression_shape(init, locals))
                        .unwrap_or(ExportShape::Dynamic);
                    locals.insert(id.name.to_string(), shape);
                }
            }
        }
        _ => {}
    }
}

/// Decide the export shape from the syntax tree, falling back to patterns
/// when the script does not parse.
pub fn detect_export_shape(script: &str) -> ExportShape {
    if script.trim().is_empty() {
        return ExportShape::Missing;
    }

    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, script, parse_source_type()).parse();
    if ret.panicked || !ret.errors.is_empty() {
        log::debug!("[sfc] export shape: script does not parse, using pattern detection");
        return detect_export_shape_by_pattern(script);
    }

    let mut locals: HashMap<String, ExportShape> = HashMap::new();
    let mut default_ref: Option<String> = None;
    let mut shape: Option<ExportShape> = None;

    for stmt in &ret.program.body {
        match stmt {
            Statement::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    locals.insert(id.name.to_string(), ExportShape::Constructor);
                }
            }
            Statement::FunctionDeclaration(func) => {
                if let Some(id) = &func.id {
                    locals.insert(id.name.to_string(), ExportShape::Constructor);
                }
            }
            Statement::VariableDeclaration(var) => {
                for declarator in &var.declarations {
                    if let BindingPattern::BindingIdentifier(id) = &declarator.id {
                        let s = declarator
                            .init
                            .as_ref()
                            .map(|init| expression_shape(init, &locals))
                            .unwrap_or(ExportShape::Dynamic);
                        locals.insert(id.name.to_string(), s);
                    }
                }
            }
            Statement::ExportNamedDeclaration(export) => {
                if let Some(decl) = &export.declaration {
                    record_declaration(decl, &mut locals);
                }
                for spec in &export.specifiers {
                    if module_export_name(&spec.exported) != "default" {
                        continue;
                    }
                    if export.source.is_some() {
                        shape = Some(ExportShape::Dynamic);
                    } else {
                        default_ref = Some(module_export_name(&spec.local));
                    }
                }
            }
            Statement::ExportDefaultDeclaration(export) => {
                shape = Some(match &export.declaration {
                    ExportDefaultDeclarationKind::ClassDeclaration(_)
                    | ExportDefaultDeclarationKind::FunctionDeclaration(_) => {
                        ExportShape::Constructor
                    }
                    ExportDefaultDeclarationKind::Identifier(id) => {
                        default_ref = Some(id.name.to_string());
                        continue;
                    }
                    other => other
                        .as_expression()
                        .map(|e| expression_shape(e, &locals))
                        .unwrap_or(ExportShape::Dynamic),
                });
            }
            _ => {}
        }
    }

    // Identifiers are resolved after the walk so later declarations count.
    if let Some(name) = default_ref {
        return locals.get(&name).copied().unwrap_or(ExportShape::Dynamic);
    }
    shape.unwrap_or(ExportShape::Missing)
}

pub fn detect_export_shape_by_pattern(script: &str) -> ExportShape {
    if DEFAULT_CONSTRUCTOR_RE.is_match(script) {
        ExportShape::Constructor
    } else if DEFAULT_OBJECT_RE.is_match(script) {
        ExportShape::Options
    } else if DEFAULT_ANY_RE.is_match(script) {
        ExportShape::Dynamic
    } else {
        ExportShape::Missing
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TAG INFERENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Tag declared by the script as `tag: "x-name"` or `static tag = "x-name"`.
pub fn infer_tag(script: &str) -> Option<String> {
    TAG_RE
        .captures(script)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Kebab-case tag from a file stem, prefixed with `x-` when it has no hyphen.
pub fn tag_from_path(path: &str) -> String {
    let stem = Path::new(path.split('?').next().unwrap_or(path))
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("component");

    let mut kebab = String::with_capacity(stem.len() + 4);
    let mut prev_lower = false;
    for c in stem.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                kebab.push('-');
            }
            kebab.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            kebab.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else if !kebab.is_empty() && !kebab.ends_with('-') {
            kebab.push('-');
            prev_lower = false;
        }
    }
    let kebab = kebab.trim_matches('-').to_string();

    if kebab.is_empty() {
        "x-component".to_string()
    } else if !kebab.starts_with(|c: char| c.is_ascii_lowercase()) || !kebab.contains('-') {
        format!("x-{}", kebab)
    } else {
        kebab
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPE STRIPPING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrippedScript {
    pub code: String,
    /// V3 source map JSON.
    pub map: Option<String>,
}

/// Remove TypeScript syntax, keeping module exports intact.
pub fn strip_types(source: &str, path: &str) -> Result<StrippedScript> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, parse_source_type()).parse();

    if ret.panicked || !ret.errors.is_empty() {
        let message = ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(CompilerError::ScriptParse {
            file: path.to_string(),
            message,
        });
    }

    let mut program = ret.program;
    let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();
    let transformed = Transformer::new(&allocator, Path::new(path), &TransformOptions::default())
        .build_with_scoping(scoping, &mut program);

    if !transformed.errors.is_empty() {
        let message = transformed
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(CompilerError::TypeStrip {
            file: path.to_string(),
            message,
        });
    }

    let output = Codegen::new()
        .with_options(CodegenOptions {
            source_map_path: Some(PathBuf::from(path)),
            ..CodegenOptions::default()
        })
        .build(&program);

    Ok(StrippedScript {
        code: output.code,
        map: output.map.map(|m| m.to_json_string()),
    })
}
