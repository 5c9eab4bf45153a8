//! Transform pipeline.
//!
//! `compile_sfc` runs one source unit through extraction, style
//! preprocessing, annotation extraction and code generation.
//! `compile_script_module` serves the companion behavior-script module.
//! `Compiler` adds the transform cache, the child component index and
//! parallel batch compilation.

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::annotations::{extract_annotations, AnnotationMetadata, StrategyKind};
use crate::cache::{CacheStats, TransformCache};
use crate::codegen::{generate_module, CodegenInput, GeneratedModule, SCRIPT_QUERY};
use crate::config::CompileOptions;
use crate::discovery::{detect_child_tags, ComponentIndex};
use crate::error::{CompilerError, Diagnostic, Result};
use crate::parse::{extract_blocks, SourceUnit};
use crate::route::describe_route;
use crate::script::{detect_export_shape, strip_types};
use crate::style::{preprocess_styles, NestedCssCompiler, StyleCompiler};

// ═══════════════════════════════════════════════════════════════════════════════
// SINGLE UNIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Compile one source unit with the built-in style compiler and no child
/// component resolution beyond what `options.project_root` provides.
pub fn compile_sfc(source: &str, path: &str, options: &CompileOptions) -> Result<GeneratedModule> {
    let index = match (&options.project_root, options.resolve_children) {
        (Some(root), true) => Some(ComponentIndex::scan(root, options)),
        _ => None,
    };
    Ok(compile_unit(
        &SourceUnit::new(path, source),
        options,
        index.as_ref(),
        &NestedCssCompiler,
    ))
}

pub(crate) fn compile_unit(
    unit: &SourceUnit,
    options: &CompileOptions,
    index: Option<&ComponentIndex>,
    style_compiler: &dyn StyleCompiler,
) -> GeneratedModule {
    let blocks = extract_blocks(unit, options);
    let styles = preprocess_styles(&blocks.style_regions, style_compiler);
    let extracted = extract_annotations(blocks.script_text());
    let shape = detect_export_shape(&extracted.script);

    let mut diagnostics: Vec<Diagnostic> = styles.diagnostics.clone();
    diagnostics.extend(extracted.diagnostics.iter().cloned());

    let route = match &blocks.route_attrs {
        Some(attrs) => match describe_route(attrs, blocks.script_text()) {
            Ok(mut route) => {
                route.file = Some(unit.path.clone());
                Some(route)
            }
            Err(diagnostic) => {
                diagnostics.push(diagnostic);
                None
            }
        },
        None => None,
    };

    let mut child_imports = Vec::new();
    if let Some(index) = index.filter(|_| options.resolve_children) {
        for tag in detect_child_tags(&blocks.template) {
            match index.resolve(&tag) {
                Some(path) => child_imports.push(path.to_string_lossy().to_string()),
                None => log::debug!("[sfc] <{}> in {} not resolved", tag, unit.path),
            }
        }
    }

    let module = generate_module(
        CodegenInput {
            source_path: &unit.path,
            source_text: &unit.raw_text,
            blocks: &blocks,
            styles: &styles,
            annotations: &extracted.metadata,
            annotation_table: &extracted.table,
            route,
            child_imports,
            shape,
            diagnostics,
        },
        options,
    );

    if !module.diagnostics.is_empty() {
        log::warn!(
            "[sfc] {} compiled with {} diagnostic(s)",
            unit.path,
            module.diagnostics.len()
        );
    }
    module
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPANION SCRIPT MODULE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptModule {
    pub code: String,
    pub map: Option<String>,
    pub annotations: Vec<AnnotationMetadata>,
    pub strategy: StrategyKind,
    pub diagnostics: Vec<Diagnostic>,
}

fn is_typescript_id(path: &str) -> bool {
    path.ends_with(".ts") || path.ends_with(".tsx")
}

/// Annotation-rewrite the behavior script and strip its types when the
/// module id ends in `.ts`.
pub fn compile_script_module(script: &str, path: &str) -> Result<ScriptModule> {
    let extracted = extract_annotations(script);

    let (code, map) = if is_typescript_id(path) {
        let stripped = strip_types(&extracted.script, path)?;
        (stripped.code, stripped.map)
    } else {
        (extracted.script, None)
    };

    Ok(ScriptModule {
        code,
        map,
        annotations: extracted.metadata,
        strategy: extracted.strategy,
        diagnostics: extracted.diagnostics,
    })
}

/// Serve a `<path>?sfc-script.<ext>` request by reading the unit from disk.
pub fn compile_script_request(id: &str, options: &CompileOptions) -> Result<ScriptModule> {
    let file = id.split(SCRIPT_QUERY).next().unwrap_or(id);
    let unit = SourceUnit::read(Path::new(file))?;
    let blocks = extract_blocks(&unit, options);
    compile_script_module(blocks.script_text(), id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHED COMPILER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Compiler {
    options: CompileOptions,
    cache: Arc<TransformCache>,
    index: Mutex<Option<Arc<ComponentIndex>>>,
    style_compiler: Box<dyn StyleCompiler>,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        let cache = Arc::new(TransformCache::from_options(&options.cache));
        Compiler {
            options,
            cache,
            index: Mutex::new(None),
            style_compiler: Box::new(NestedCssCompiler),
        }
    }

    pub fn with_style_compiler(mut self, compiler: Box<dyn StyleCompiler>) -> Self {
        self.style_compiler = compiler;
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<TransformCache> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Component index for the project root, scanned on first use.
    fn component_index(&self) -> Option<Arc<ComponentIndex>> {
        if !self.options.resolve_children {
            return None;
        }
        let root = self.options.project_root.as_ref()?;
        let mut index = self.index.lock();
        if index.is_none() {
            *index = Some(Arc::new(ComponentIndex::scan(root, &self.options)));
        }
        index.clone()
    }

    /// Drop the component index; the next compile rescans the project.
    pub fn refresh_index(&self) {
        *self.index.lock() = None;
    }

    /// Compile a file, serving unchanged files from the cache.
    pub fn compile(&self, path: &Path) -> Result<GeneratedModule> {
        let id = path.to_string_lossy().to_string();
        if let Some(hit) = self.cache.get(&id, path) {
            return Ok(hit);
        }

        let mtime = TransformCache::file_mtime_ms(path)
            .ok_or_else(|| CompilerError::io(id.clone(), std::io::Error::from(std::io::ErrorKind::NotFound)))?;
        let unit = SourceUnit::read(path)?;
        let index = self.component_index();
        let module = compile_unit(&unit, &self.options, index.as_deref(), self.style_compiler.as_ref());

        self.cache.set_with_mtime(&id, path, mtime, module.clone());
        Ok(module)
    }

    /// Compile independent units in parallel.
    pub fn compile_many(&self, paths: &[PathBuf]) -> Vec<Result<GeneratedModule>> {
        paths.par_iter().map(|path| self.compile(path)).collect()
    }

    pub fn compile_script(&self, id: &str) -> Result<ScriptModule> {
        compile_script_request(id, &self.options)
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        self.cache.invalidate(&path.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_diagnostic_reaches_module() {
        let module = compile_sfc(
            "<route tag=\"x-a\" /><template><p></p></template>",
            "/p/x-a.sfc",
            &CompileOptions::default(),
        )
        .unwrap();
        assert!(module.route.is_none());
        assert!(module.code.contains("SFC-DIAG-ROUTE"));
    }

    #[test]
    fn test_script_module_strips_annotations_and_types() {
        let module = compile_script_module(
            "export default class Counter {\n  count: number = 0;\n  @click('.btn')\n  inc(): void { this.count++; }\n}",
            "/c/counter.sfc?sfc-script.ts",
        )
        .unwrap();
        assert_eq!(module.strategy, StrategyKind::Tree);
        assert!(!module.code.contains('@'));
        assert!(!module.code.contains(": void"));
        assert!(module.code.contains("__metadata"));
        assert_eq!(module.annotations.len(), 1);
    }

    #[test]
    fn test_js_script_module_keeps_text() {
        let module = compile_script_module("export default { tag: 'x-a' };", "/a.sfc?sfc-script.js").unwrap();
        assert_eq!(module.code, "export default { tag: 'x-a' };");
        assert!(module.map.is_none());
    }
}
