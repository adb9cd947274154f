//! Error types for the memory engine

use thiserror::Error;

use crate::types::MemoryId;

/// Result type alias for memory engine operations
pub type Result<T> = std::result::Result<T, LtmError>;

/// Main error type for the memory engine
#[derive(Error, Debug)]
pub enum LtmError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(MemoryId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LtmError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LtmError::Conflict(_) => true,
            LtmError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// True for errors caused by malformed caller input
    pub fn is_validation(&self) -> bool {
        matches!(self, LtmError::Validation(_))
    }
}
