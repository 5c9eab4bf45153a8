//! Style sheet dedup.
//!
//! Identical CSS text is constructed into a sheet once per runtime and shared
//! by every mount root; each root applies a given sheet at most once.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::rc::Rc;

use super::dom::{Dom, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSheet {
    pub hash: String,
    pub css: String,
}

pub fn css_hash(css: &str) -> String {
    hex::encode(Sha256::digest(css.as_bytes()))
}

#[derive(Debug, Default)]
pub struct StyleSheetCache {
    sheets: HashMap<String, Rc<StyleSheet>>,
    constructions: usize,
}

impl StyleSheetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared sheet for `css`, constructed on first request.
    pub fn sheet(&mut self, css: &str) -> Rc<StyleSheet> {
        let hash = css_hash(css);
        if let Some(sheet) = self.sheets.get(&hash) {
            return Rc::clone(sheet);
        }
        self.constructions += 1;
        let sheet = Rc::new(StyleSheet {
            hash: hash.clone(),
            css: css.to_string(),
        });
        self.sheets.insert(hash, Rc::clone(&sheet));
        sheet
    }

    /// Apply `css` to `root`. Blank CSS is ignored. Returns the sheet hash when
    /// the sheet is (or already was) applied.
    pub fn attach(&mut self, dom: &mut Dom, root: NodeId, css: &str) -> Option<String> {
        if css.trim().is_empty() {
            return None;
        }
        let sheet = self.sheet(css);
        let hash = sheet.hash.clone();
        if !dom.adopt_sheet(root, sheet) {
            log::debug!("[sfc] style sheet {} already applied to root", &hash[..12]);
        }
        Some(hash)
    }

    /// Number of distinct sheets constructed.
    pub fn constructions(&self) -> usize {
        self.constructions
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}
