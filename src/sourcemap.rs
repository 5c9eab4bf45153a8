//! Line-level source maps for generated modules.
//!
//! Generated lines are mapped to whole lines of the source unit. The map is
//! serialized as a V3 source map with a single source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Maps generated line numbers to original line numbers (both 1-based).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    lines: BTreeMap<usize, usize>,
}

impl LineMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_line_mapping(&mut self, generated_line: usize, original_line: usize) {
        self.lines.insert(generated_line, original_line);
    }

    /// Map `count` consecutive generated lines starting at `generated_start`.
    pub fn add_range(&mut self, generated_start: usize, original_start: usize, count: usize) {
        for i in 0..count {
            self.lines.insert(generated_start + i, original_start + i);
        }
    }

    pub fn original_line(&self, generated_line: usize) -> Option<usize> {
        self.lines.get(&generated_line).copied()
    }

    pub fn mapping_count(&self) -> usize {
        self.lines.len()
    }

    /// Encode the `mappings` field: one segment at column 0 per mapped line.
    pub fn encode_mappings(&self) -> String {
        let last_line = self.lines.keys().next_back().copied().unwrap_or(0);
        let mut out = String::new();
        let mut prev_original = 0i64;

        for line in 1..=last_line {
            if line > 1 {
                out.push(';');
            }
            if let Some(&original) = self.lines.get(&line) {
                let original = original.saturating_sub(1) as i64;
                encode_vlq(&mut out, 0);
                encode_vlq(&mut out, 0);
                encode_vlq(&mut out, original - prev_original);
                encode_vlq(&mut out, 0);
                prev_original = original;
            }
        }

        out
    }

    pub fn to_v3(&self, file: &str, source_path: &str, source_content: Option<&str>) -> SourceMapV3 {
        SourceMapV3 {
            version: 3,
            file: file.to_string(),
            sources: vec![source_path.to_string()],
            sources_content: source_content.map(|c| vec![c.to_string()]),
            names: Vec::new(),
            mappings: self.encode_mappings(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapV3 {
    pub version: u8,
    pub file: String,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<String>>,
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMapV3 {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlq(value: i64) -> String {
        let mut s = String::new();
        encode_vlq(&mut s, value);
        s
    }

    #[test]
    fn test_vlq() {
        assert_eq!(vlq(0), "A");
        assert_eq!(vlq(1), "C");
        assert_eq!(vlq(-1), "D");
        assert_eq!(vlq(16), "gB");
        assert_eq!(vlq(123), "2H");
    }

    #[test]
    fn test_mappings_skip_unmapped_lines() {
        let mut map = LineMap::new();
        map.add_range(2, 5, 2);
        map.add_line_mapping(5, 1);
        assert_eq!(map.encode_mappings(), ";AAIA;AACA;;AALA");
        assert_eq!(map.original_line(3), Some(6));
        assert_eq!(map.original_line(4), None);
    }

    #[test]
    fn test_v3_json() {
        let mut map = LineMap::new();
        map.add_line_mapping(1, 1);
        let json = map.to_v3("a.js", "a.sfc", None).to_json();
        assert_eq!(
            json,
            r#"{"version":3,"file":"a.js","sources":["a.sfc"],"names":[],"mappings":"AAAA"}"#
        );
    }
}
