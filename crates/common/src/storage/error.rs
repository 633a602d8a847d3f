//! Storage error types
//!
//! Defines error types for the storage layer and classifies them for the
//! retry executor.

use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Storage error type
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database query error: {0}")]
    Query(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: i32, found: i32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    R2d2(#[from] r2d2::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// SQLite BUSY / LOCKED, raised when a concurrent writer holds the lock
    /// past the busy timeout.
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Self::Rusqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    /// Unique or foreign-key constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Rusqlite(err) => {
                matches!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::ConstraintViolation))
            }
            _ => false,
        }
    }
}

impl ErrorClassification for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::Rusqlite(_) => self.is_lock_contention(),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::Rusqlite(_) if self.is_lock_contention() => ErrorSeverity::Warning,
            Self::Migration(_) | Self::SchemaVersionMismatch { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Migration(_) | Self::SchemaVersionMismatch { .. })
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        None
    }
}
