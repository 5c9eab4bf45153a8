//! # SFC Compiler
//!
//! Compiles single-file components (template markup, a behavior script,
//! stylesheet regions and a route declaration in one source unit) into an ES
//! module that registers a custom element, and provides the runtime wiring
//! engine that turns such a registration into live, interactive elements.
//!
//! ## Compiler pipeline
//!
//! 1. **Block extraction** (`parse`): bounded pattern scan for `<template>`,
//!    `<script>`, `<style>` and `<route>` regions.
//! 2. **Style preprocessing** (`style`): scoped/global partition and the
//!    built-in nested dialect compiler.
//! 3. **Annotation extraction** (`annotations`): method annotations are
//!    removed from the script and re-emitted as `__metadata` assignments and a
//!    static annotation table.
//! 4. **Code generation** (`codegen`): runtime imports, child component
//!    imports, embedded constants and the registration call.
//! 5. **Transform cache** (`cache`): memoized output keyed by module id and
//!    file modification time.
//!
//! ## Runtime
//!
//! `runtime` models the browser side over an arena DOM: lifecycle, template
//! mounting, style dedup, parameter interpolation and annotation wiring.

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod annotations;
pub mod cache;
pub mod codegen;
pub mod config;
pub mod discovery;
pub mod error;
pub mod parse;
pub mod route;
pub mod runtime;
pub mod script;
pub mod sourcemap;
pub mod style;
pub mod transform;


pub use annotations::{extract_annotations, AnnotationMetadata, ExtractedAnnotations};
pub use cache::{CacheStats, TransformCache};
pub use codegen::GeneratedModule;
pub use config::{CacheOptions, CompileOptions};
pub use discovery::route_manifest;
pub use error::{CompilerError, Diagnostic, Result, RuntimeError};
pub use parse::{extract_blocks, BlockSet, SourceUnit, StyleRegion};
pub use route::{manifest_from_modules, RouteDescriptor};
pub use runtime::{Registration, Runtime, RuntimeServices};
pub use style::{NestedCssCompiler, StyleCompiler};
pub use transform::{compile_script_module, compile_sfc, Compiler, ScriptModule};

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI BRIDGE
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
fn napi_err(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_sfc_native(source: String, path: String) -> napi::Result<serde_json::Value> {
    let module = compile_sfc(&source, &path, &CompileOptions::default()).map_err(napi_err)?;
    serde_json::to_value(module).map_err(napi_err)
}

#[cfg(feature = "napi")]
#[napi]
pub fn compile_script_native(script: String, path: String) -> napi::Result<serde_json::Value> {
    let module = compile_script_module(&script, &path).map_err(napi_err)?;
    serde_json::to_value(module).map_err(napi_err)
}

#[cfg(feature = "napi")]
#[napi]
pub fn route_manifest_native(dir: String) -> napi::Result<serde_json::Value> {
    let manifest = route_manifest(std::path::Path::new(&dir), &CompileOptions::default()).map_err(napi_err)?;
    serde_json::to_value(manifest).map_err(napi_err)
}
