//! Error types for the audit core

use std::io;
use thiserror::Error;

/// Audit error type
#[derive(Error, Debug)]
pub enum AuditError {
    /// The catalog table (or a file it depends on) is missing. Recoverable by
    /// bootstrapping with `ex_nihilo`.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// More than one stored row matches a path. Never resolved automatically.
    #[error("Duplicate entry: {count} rows match path '{path}'")]
    DuplicateEntry { path: String, count: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("Database error: {0}")]
    Database(crawlaudit_db::BackendError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuditError {
    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an invalid attribute error.
    pub fn invalid_attribute(msg: impl Into<String>) -> Self {
        Self::InvalidAttribute(msg.into())
    }
}

impl From<crawlaudit_db::BackendError> for AuditError {
    fn from(err: crawlaudit_db::BackendError) -> Self {
        if err.is_missing_table() {
            AuditError::StoreUnavailable(err.to_string())
        } else {
            AuditError::Database(err)
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AuditError>;
