//! Error types for android-tools
//!
//! Centralized error handling using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type shared by the toolchain and task crates
#[derive(Error, Debug)]
pub enum ToolsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Checksum mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for android-tools operations
pub type Result<T> = std::result::Result<T, ToolsError>;

impl From<roxmltree::Error> for ToolsError {
    fn from(e: roxmltree::Error) -> Self {
        ToolsError::Xml(e.to_string())
    }
}
