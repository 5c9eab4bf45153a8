//! Compiler configuration.
//!
//! Options are plain serde structs with every field defaulted, so a config
//! file only has to name what it overrides. Both `.json` and `.toml` files
//! are accepted.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CompilerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Module id the generated code imports `defineComponent`/`attachStyles` from.
    pub runtime_module: String,
    /// File extension of component source units (without the dot).
    pub extension: String,
    /// Boolean attributes that mark a `<style>` region as global.
    pub global_markers: Vec<String>,
    /// `lang` values routed through the extended style compiler.
    pub extended_dialects: Vec<String>,
    /// Root scanned when resolving child component tags. Child imports are
    /// skipped when unset.
    pub project_root: Option<PathBuf>,
    pub resolve_children: bool,
    pub source_maps: bool,
    pub cache: CacheOptions,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            runtime_module: "sfc/runtime".to_string(),
            extension: "sfc".to_string(),
            global_markers: vec!["global".to_string(), "is:global".to_string()],
            extended_dialects: vec![
                "scss".to_string(),
                "nested".to_string(),
                "postcss".to_string(),
            ],
            project_root: None,
            resolve_children: true,
            source_maps: true,
            cache: CacheOptions::default(),
        }
    }
}

impl CompileOptions {
    pub fn is_global_marker(&self, attr: &str) -> bool {
        self.global_markers.iter().any(|m| m.eq_ignore_ascii_case(attr))
    }

    pub fn is_extended_dialect(&self, lang: &str) -> bool {
        self.extended_dialects
            .iter()
            .any(|d| d.eq_ignore_ascii_case(lang))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    /// LRU ceiling; inserting beyond it evicts the least recently used entry.
    pub max_entries: usize,
    /// Durable snapshot file. No snapshotting when unset.
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval_ms: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            max_entries: 500,
            snapshot_path: None,
            snapshot_interval_ms: 5000,
        }
    }
}

/// Load options from a `.json` or `.toml` file.
pub fn load(config_path: &Path) -> Result<CompileOptions> {
    let content = fs::read_to_string(config_path)
        .map_err(|e| CompilerError::io(config_path.display().to_string(), e))?;

    let options = match config_path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| CompilerError::Config {
            message: format!("Invalid JSON config: {}", e),
        })?,
        Some("toml") => toml::from_str(&content).map_err(|e| CompilerError::Config {
            message: format!("Invalid TOML config: {}", e),
        })?,
        _ => {
            return Err(CompilerError::Config {
                message: "Config file must be .json or .toml format".to_string(),
            })
        }
    };

    log::info!("Loaded configuration from {}", config_path.display());
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let opts = CompileOptions::default();
        assert!(opts.is_global_marker("global"));
        assert!(opts.is_global_marker("is:global"));
        assert!(!opts.is_global_marker("scoped"));
        assert!(opts.is_extended_dialect("SCSS"));
        assert_eq!(opts.cache.max_entries, 500);
    }

    #[test]
    fn test_load_partial_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{ "runtimeModule": "/@rt", "cache": {{ "maxEntries": 3 }} }}"#).unwrap();

        let opts = load(file.path()).unwrap();
        assert_eq!(opts.runtime_module, "/@rt");
        assert_eq!(opts.cache.max_entries, 3);
        assert_eq!(opts.cache.snapshot_interval_ms, 5000);
        assert_eq!(opts.extension, "sfc");
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "extension = \"wc\"\nglobalMarkers = [\"app\"]").unwrap();

        let opts = load(file.path()).unwrap();
        assert_eq!(opts.extension, "wc");
        assert!(opts.is_global_marker("app"));
        assert!(!opts.is_global_marker("global"));
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = load(file.path()).unwrap_err();
        assert_eq!(err.code(), crate::error::ERR_CONFIG);
    }
}
