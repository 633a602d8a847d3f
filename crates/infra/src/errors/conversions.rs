//! Conversions from external infrastructure errors into domain errors.

use calsync_common::storage::StorageError;
use calsync_common::ErrorClassification;
use calsync_domain::CalsyncError;
use reqwest::{Error as HttpError, StatusCode};
use rusqlite::Error as SqlError;
use tokio::task::JoinError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CalsyncError);

impl From<InfraError> for CalsyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CalsyncError> for InfraError {
    fn from(value: CalsyncError) -> Self {
        InfraError(value)
    }
}

trait IntoCalsyncError {
    fn into_calsync(self) -> CalsyncError;
}

/* -------------------------------------------------------------------------- */
/* HTTP status → CalsyncError */
/* -------------------------------------------------------------------------- */

/// Map a non-success provider response onto the error taxonomy. 410 is the
/// provider's answer to a stale sync token.
pub fn status_error(status: StatusCode, body: &str) -> CalsyncError {
    let code = status.as_u16();
    let reason = status.canonical_reason().unwrap_or("unknown status");
    let message = if body.trim().is_empty() {
        format!("HTTP {code} {reason}")
    } else {
        format!("HTTP {code} {reason}: {}", body.trim())
    };

    match code {
        410 => CalsyncError::TokenInvalid(message),
        404 => CalsyncError::NotFound(message),
        401 | 403 => CalsyncError::Auth(message),
        408 => CalsyncError::Timeout(message),
        429 | 500..=599 => CalsyncError::Network(message),
        400..=499 => CalsyncError::InvalidInput(message),
        _ => CalsyncError::Network(message),
    }
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → CalsyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalsyncError for SqlError {
    fn into_calsync(self) -> CalsyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => CalsyncError::Busy("database is busy".into()),
                    (ErrorCode::DatabaseLocked, _) => {
                        CalsyncError::Busy("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067) => {
                        CalsyncError::Database(format!("unique constraint violation: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        CalsyncError::Database("foreign key constraint violation".into())
                    }
                    _ => CalsyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => CalsyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                CalsyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                CalsyncError::Database(format!("invalid column type: {ty}"))
            }
            RE::InvalidQuery => CalsyncError::Database("invalid SQL query".into()),
            other => CalsyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* StorageError → CalsyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalsyncError for StorageError {
    fn into_calsync(self) -> CalsyncError {
        match self {
            StorageError::Rusqlite(err) => err.into_calsync(),
            StorageError::Timeout(secs) => {
                CalsyncError::Timeout(format!("database connection timeout after {secs}s"))
            }
            other if other.is_retryable() => CalsyncError::Busy(other.to_string()),
            other => CalsyncError::Database(other.to_string()),
        }
    }
}

impl From<StorageError> for InfraError {
    fn from(value: StorageError) -> Self {
        InfraError(value.into_calsync())
    }
}

/// A blocking repository task that panicked or was cancelled.
pub fn join_error(err: JoinError) -> CalsyncError {
    if err.is_cancelled() {
        CalsyncError::Internal("blocking task cancelled".into())
    } else {
        CalsyncError::Internal(format!("blocking task failed: {err}"))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CalsyncError */
/* -------------------------------------------------------------------------- */

impl IntoCalsyncError for HttpError {
    fn into_calsync(self) -> CalsyncError {
        if self.is_timeout() {
            return CalsyncError::Timeout("HTTP request timed out".into());
        }
        if self.is_connect() {
            return CalsyncError::Network("HTTP connection failure".into());
        }
        if let Some(status) = self.status() {
            return status_error(status, "");
        }
        if self.is_decode() {
            return CalsyncError::InvalidInput(format!("malformed provider response: {self}"));
        }
        CalsyncError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_calsync())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → CalsyncError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(CalsyncError::Database(format!("invalid stored JSON: {value}")))
    }
}
