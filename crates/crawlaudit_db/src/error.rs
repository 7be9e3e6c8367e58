//! Error types for the catalog store layer.

use thiserror::Error;

/// Store operation result type.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Operation requires write access but database is read-only")]
    ReadOnly,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// True when the error came from a missing table.
    ///
    /// SQLite reports this as a generic prepare failure, so the message is
    /// the only signal.
    pub fn is_missing_table(&self) -> bool {
        match self {
            BackendError::Sqlite(err) => err.to_string().contains("no such table"),
            _ => false,
        }
    }
}
