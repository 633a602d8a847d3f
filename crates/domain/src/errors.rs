//! Error types used throughout the application

use std::time::Duration;

use calsync_common::error::{ErrorClassification, ErrorSeverity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for calsync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CalsyncError {
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite reported BUSY or LOCKED; the statement may succeed later.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The provider rejected a stale continuation token (HTTP 410).
    #[error("Sync token invalid: {0}")]
    TokenInvalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CalsyncError {
    /// Transient failures worth retrying with backoff: network errors,
    /// timeouts, 5xx/429 responses and database lock contention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_) | Self::Busy(_))
    }

    pub fn is_token_invalid(&self) -> bool {
        matches!(self, Self::TokenInvalid(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl ErrorClassification for CalsyncError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound(_) | Self::TokenInvalid(_) => ErrorSeverity::Info,
            Self::Network(_) | Self::Timeout(_) | Self::Busy(_) => ErrorSeverity::Warning,
            Self::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Result type alias for calsync operations
pub type Result<T> = std::result::Result<T, CalsyncError>;
