//! Error taxonomy for the SFC compiler and its runtime.
//!
//! Compile-time failures that must reach the caller are `CompilerError`s.
//! Everything the pipeline can recover from (missing blocks, style compile
//! failures, annotation fallbacks) is reported as a `Diagnostic` instead and
//! never aborts a transform.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_IO: &str = "SFC-ERR-IO";
pub const ERR_CONFIG: &str = "SFC-ERR-CONFIG";
pub const ERR_SCRIPT_PARSE: &str = "SFC-ERR-SCRIPT-PARSE";
pub const ERR_TYPE_STRIP: &str = "SFC-ERR-TYPE-STRIP";
pub const ERR_SERIALIZE: &str = "SFC-ERR-SERIALIZE";

pub const DIAG_STYLE_COMPILE: &str = "SFC-DIAG-STYLE";
pub const DIAG_ANNOTATION_FALLBACK: &str = "SFC-DIAG-ANNOTATION";
pub const DIAG_ROUTE: &str = "SFC-DIAG-ROUTE";

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Script parse error in {file}: {message}")]
    ScriptParse { file: String, message: String },

    #[error("Type stripping failed in {file}: {message}")]
    TypeStrip { file: String, message: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CompilerError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        CompilerError::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable code used by hosts to classify failures.
    pub fn code(&self) -> &'static str {
        match self {
            CompilerError::Io { .. } => ERR_IO,
            CompilerError::Config { .. } => ERR_CONFIG,
            CompilerError::ScriptParse { .. } => ERR_SCRIPT_PARSE,
            CompilerError::TypeStrip { .. } => ERR_TYPE_STRIP,
            CompilerError::Serialize(_) => ERR_SERIALIZE,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompilerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// A non-fatal finding surfaced alongside generated output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Render as a block comment that is safe to embed in generated JS.
    pub fn as_comment(&self) -> String {
        format!(
            "/* [sfc] {}: {} */",
            self.code,
            self.message.replace("*/", "* /")
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Component tag {0:?} is missing or does not contain a hyphen")]
    InvalidTag(String),

    #[error("A component is already defined for <{0}>")]
    AlreadyDefined(String),

    #[error("Unknown method `{0}`")]
    UnknownMethod(String),

    #[error("Invalid selector {0:?}")]
    InvalidSelector(String),

    #[error("Node is not a component instance")]
    NotAComponent,

    #[error("Method failed: {0}")]
    Method(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CompilerError::Config {
            message: "bad".to_string(),
        };
        assert_eq!(err.code(), ERR_CONFIG);
        assert_eq!(err.to_string(), "Invalid configuration: bad");
    }

    #[test]
    fn test_diagnostic_comment_cannot_close_early() {
        let diag = Diagnostic::new(DIAG_STYLE_COMPILE, "unexpected */ token");
        let comment = diag.as_comment();
        assert!(comment.starts_with("/* [sfc] SFC-DIAG-STYLE:"));
        assert_eq!(comment.matches("*/").count(), 1);
    }
}
