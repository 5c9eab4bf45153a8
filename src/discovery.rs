//! Discovery Module for the SFC compiler
//!
//! Recursively scans a project for component source units. The index maps
//! custom-element tags to the files that define them so the code generator
//! can emit side-effect imports for child components, and the same scan
//! produces the live route manifest.

use lazy_static::lazy_static;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CompileOptions;
use crate::error::Result;
use crate::parse::{extract_blocks, SourceUnit};
use crate::route::{describe_route, sort_manifest, RouteDescriptor};
use crate::script::{infer_tag, tag_from_path};

lazy_static! {
    /// Opening tags of custom elements (names containing a hyphen)
    static ref CUSTOM_TAG_RE: Regex =
        Regex::new(r"<([a-z][a-z0-9]*(?:-[a-z0-9]*)+)[\s/>]").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE SCAN
// ═══════════════════════════════════════════════════════════════════════════════

/// Recursively find all source units with the given extension.
pub fn find_source_files(dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map_or(false, |ext| ext == extension))
        .collect();
    files.sort();
    files
}

/// Custom-element tags used in a template, in first-use order.
pub fn detect_child_tags(template: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    CUSTOM_TAG_RE
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT INDEX
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentIndex {
    /// Tags declared in scripts (`tag: "x-a"`)
    declared: BTreeMap<String, Vec<PathBuf>>,
    /// Tags derived from file names
    by_filename: BTreeMap<String, Vec<PathBuf>>,
}

impl ComponentIndex {
    /// Scan `root` for source units and index them by tag.
    pub fn scan(root: &Path, options: &CompileOptions) -> Self {
        let mut index = ComponentIndex::default();
        if !root.exists() {
            log::debug!("[sfc] component root {} does not exist", root.display());
            return index;
        }

        for path in find_source_files(root, &options.extension) {
            let source = match fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("[sfc] failed to read component {:?}: {}", path, e);
                    continue;
                }
            };
            let unit = SourceUnit::new(path.to_string_lossy(), source);
            let blocks = extract_blocks(&unit, options);
            index.insert(&path, infer_tag(blocks.script_text()));
        }

        index
    }

    /// Index a unit under its declared tag, or under its file-name tag when
    /// it declares none. A declared tag is the only name the unit registers.
    pub fn insert(&mut self, path: &Path, declared_tag: Option<String>) {
        match declared_tag {
            Some(tag) => self.declared.entry(tag).or_default().push(path.to_path_buf()),
            None => {
                let derived = tag_from_path(&path.to_string_lossy());
                self.by_filename
                    .entry(derived)
                    .or_default()
                    .push(path.to_path_buf());
            }
        }
    }

    /// Resolve a tag to exactly one file. Declared tags win over file names;
    /// ambiguous matches resolve to nothing.
    pub fn resolve(&self, tag: &str) -> Option<&Path> {
        for (source, candidates) in [("declared", &self.declared), ("filename", &self.by_filename)] {
            match candidates.get(tag).map(Vec::as_slice) {
                Some([only]) => return Some(only.as_path()),
                Some(many) if many.len() > 1 => {
                    log::debug!(
                        "[sfc] <{}> is ambiguous by {} ({} candidates); skipping import",
                        tag,
                        source,
                        many.len()
                    );
                    return None;
                }
                _ => {}
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        let mut paths: HashSet<&PathBuf> = HashSet::new();
        paths.extend(self.declared.values().flatten());
        paths.extend(self.by_filename.values().flatten());
        paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty() && self.by_filename.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTE MANIFEST
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the route manifest from a live directory scan.
pub fn route_manifest(dir: &Path, options: &CompileOptions) -> Result<Vec<RouteDescriptor>> {
    let files = find_source_files(dir, &options.extension);

    let routes: Vec<Option<RouteDescriptor>> = files
        .par_iter()
        .map(|path| -> Result<Option<RouteDescriptor>> {
            let unit = SourceUnit::read(path)?;
            let blocks = extract_blocks(&unit, options);
            let Some(attrs) = &blocks.route_attrs else {
                return Ok(None);
            };
            match describe_route(attrs, blocks.script_text()) {
                Ok(mut route) => {
                    route.file = Some(unit.path.clone());
                    Ok(Some(route))
                }
                Err(diagnostic) => {
                    log::warn!("[sfc] {}: {}", unit.path, diagnostic.message);
                    Ok(None)
                }
            }
        })
        .collect::<Result<_>>()?;

    let mut manifest: Vec<RouteDescriptor> = routes.into_iter().flatten().collect();
    sort_manifest(&mut manifest);
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_detect_child_tags() {
        let tags = detect_child_tags(
            "<user-card id=\"a\"></user-card><p></p><user-card/><x-icon-large>",
        );
        assert_eq!(tags, vec!["user-card", "x-icon-large"]);
    }

    #[test]
    fn test_index_resolves_declared_and_filename_tags() {
        let dir = tempfile::tempdir().unwrap();
        let declared = write(
            dir.path(),
            "components/Card.sfc",
            "<script>export default { tag: 'fancy-card' }</script>",
        );
        let by_name = write(dir.path(), "components/todo-item.sfc", "<template></template>");
        write(dir.path(), "notes.txt", "<user-card>");

        let index = ComponentIndex::scan(dir.path(), &CompileOptions::default());
        assert_eq!(index.len(), 2);
        assert_eq!(index.resolve("fancy-card"), Some(declared.as_path()));
        assert_eq!(index.resolve("todo-item"), Some(by_name.as_path()));
        assert_eq!(index.resolve("x-card"), None);
        assert_eq!(index.resolve("missing-tag"), None);
    }

    #[test]
    fn test_ambiguous_tags_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/nav-bar.sfc", "");
        write(dir.path(), "b/nav-bar.sfc", "");

        let index = ComponentIndex::scan(dir.path(), &CompileOptions::default());
        assert_eq!(index.resolve("nav-bar"), None);
    }

    #[test]
    fn test_declared_tag_hides_file_name_tag() {
        let dir = tempfile::tempdir().unwrap();
        let site_nav = write(
            dir.path(),
            "a/nav-bar.sfc",
            "<script>export default { tag: 'site-nav' }</script>",
        );
        let plain = write(dir.path(), "b/nav-bar.sfc", "<template><nav></nav></template>");

        let index = ComponentIndex::scan(dir.path(), &CompileOptions::default());
        assert_eq!(index.len(), 2);
        assert_eq!(index.resolve("site-nav"), Some(site_nav.as_path()));
        assert_eq!(index.resolve("nav-bar"), Some(plain.as_path()));
    }

    #[test]
    fn test_route_manifest_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "pages/user.sfc",
            "<route path=\"/users/:id\" />\n<script>export default { tag: 'user-page' }</script>",
        );
        write(dir.path(), "pages/api.sfc", "<route path=\"/api/ping\" method=\"post\" />");
        write(dir.path(), "pages/plain.sfc", "<template><p>no route</p></template>");

        let manifest = route_manifest(dir.path(), &CompileOptions::default()).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0].path, "/api/ping");
        assert!(manifest[0].handler_only);
        assert_eq!(manifest[0].methods, vec!["POST"]);
        assert_eq!(manifest[1].tag.as_deref(), Some("user-page"));
        assert!(manifest[1].file.as_deref().unwrap().ends_with("user.sfc"));
    }
}
