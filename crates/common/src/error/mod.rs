//! Error classification shared by the storage layer and the retry executor.
//!
//! Errors that cross a retry boundary implement [`ErrorClassification`] so
//! that retry policies can decide on retryability without knowing the
//! concrete error type.
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Resource not found, empty results |
//! | **Warning** | Degraded but operational | Busy database, transient failures |
//! | **Error** | Failure requiring attention | Invalid input, config errors |
//! | **Critical** | System integrity at risk | Corrupted schema, internal errors |
//!
//! ## Example
//!
//! ```rust,ignore
//! use calsync_common::error::{ErrorClassification, ErrorSeverity};
//!
//! impl ErrorClassification for FetchError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Timeout | Self::Unavailable)
//!     }
//!
//!     fn severity(&self) -> ErrorSeverity {
//!         if self.is_retryable() { ErrorSeverity::Warning } else { ErrorSeverity::Error }
//!     }
//!
//!     fn is_critical(&self) -> bool {
//!         false
//!     }
//!
//!     fn retry_after(&self) -> Option<Duration> {
//!         None
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Standard interface for classifying errors by their characteristics.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as timeouts, busy databases or temporary service
    /// unavailability.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for monitoring, alerting, and logging decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific delay is recommended (e.g.
    /// from a `Retry-After` header), or `None` to fall back to the executor's
    /// backoff schedule.
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum LockError {
        Busy,
        Corrupt,
    }

    impl ErrorClassification for LockError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Busy)
        }

        fn severity(&self) -> ErrorSeverity {
            match self {
                Self::Busy => ErrorSeverity::Warning,
                Self::Corrupt => ErrorSeverity::Critical,
            }
        }

        fn is_critical(&self) -> bool {
            self.severity() == ErrorSeverity::Critical
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                Self::Busy => Some(Duration::from_millis(50)),
                Self::Corrupt => None,
            }
        }
    }

    /// Validates severity ordering used for alert thresholds.
    ///
    /// Assertions:
    /// - Ensures `Critical > Error > Warning > Info`.
    #[test]
    fn test_error_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Error > ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning > ErrorSeverity::Info);
    }

    /// Validates `ErrorSeverity` display strings.
    ///
    /// Assertions:
    /// - Confirms each level renders as its upper-case log label.
    #[test]
    fn test_error_severity_display() {
        assert_eq!(ErrorSeverity::Info.to_string(), "INFO");
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
        assert_eq!(ErrorSeverity::Error.to_string(), "ERROR");
        assert_eq!(ErrorSeverity::Critical.to_string(), "CRITICAL");
    }

    /// Validates a custom classification drives retryability and criticality.
    ///
    /// Assertions:
    /// - Busy errors are retryable with a suggested delay.
    /// - Corrupt errors are critical and not retryable.
    #[test]
    fn test_custom_classification() {
        assert!(LockError::Busy.is_retryable());
        assert_eq!(LockError::Busy.retry_after(), Some(Duration::from_millis(50)));
        assert!(!LockError::Corrupt.is_retryable());
        assert!(LockError::Corrupt.is_critical());
    }
}
