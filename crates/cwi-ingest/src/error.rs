//! Error types for the CWI ingest pipeline
//!
//! This module provides user-friendly error types with clear, actionable messages
//! that help operators understand what went wrong and how to fix it.

use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Comprehensive error type for ingest operations
///
/// All errors are designed to be user-facing with clear messages and suggestions.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Destination table does not exist in the database
    #[error("Table '{0}' not found in the database. The schema must be created before loading; run 'cwi-ingest build' against a fresh database or check the configured schema file.")]
    TableMissing(String),

    /// A destination column declares a type the coercion layer cannot handle
    #[error("Type '{declared}' is not implemented for table '{table}' in column '{column}'. Supported declared types: INTEGER/INT, REAL, TEXT, CHAR, DATE.")]
    UnsupportedColumnType {
        table: String,
        column: String,
        declared: String,
    },

    /// Statement file produced no statements
    #[error("No SQL statements found in '{0}'. Check that the file is not empty and that statements are terminated with ';'.")]
    EmptySqlFile(String),

    /// PRAGMA changes are silent no-ops inside a transaction, so refuse them
    #[error("Cannot change 'PRAGMA {0}' while a transaction is open. Commit or roll back first.")]
    PragmaInTransaction(String),

    /// FTP transfer failed
    #[error("FTP error: {0}. Check the host settings and your network connection.")]
    Ftp(#[from] suppaftp::FtpError),

    /// Zip archive could not be read or extracted
    #[error("Archive error: {0}. The downloaded file may be truncated; delete it and re-run the download.")]
    Archive(#[from] zip::result::ZipError),

    /// Database operation failed (rusqlite)
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// CSV reading failed
    #[error("CSV error: {0}. Check the extract file for truncation or encoding problems.")]
    Csv(#[from] csv::Error),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your environment variables or the configured paths.")]
    Config(String),

    /// Shared error from cwi-common
    #[error(transparent)]
    Common(#[from] cwi_common::CwiError),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing-table error
    pub fn table_missing(table: impl Into<String>) -> Self {
        Self::TableMissing(table.into())
    }

    /// Create an unsupported-column-type error
    pub fn unsupported_column_type(
        table: impl Into<String>,
        column: impl Into<String>,
        declared: impl Into<String>,
    ) -> Self {
        Self::UnsupportedColumnType {
            table: table.into(),
            column: column.into(),
            declared: declared.into(),
        }
    }
}
