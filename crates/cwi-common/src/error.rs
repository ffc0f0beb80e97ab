//! Error types for CWI

use thiserror::Error;

/// Result type alias for CWI operations
pub type Result<T> = std::result::Result<T, CwiError>;

/// Main error type for CWI
#[derive(Error, Debug)]
pub enum CwiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown schema version: {0}")]
    UnknownSchemaVersion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
