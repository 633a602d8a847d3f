//! Retry executors for provider and channel calls.

use std::time::Duration;

use calsync_common::resilience::policies::{ClassifiedRetry, PredicateRetry};
use calsync_common::resilience::{BackoffStrategy, Jitter, RetryConfig, RetryError, RetryExecutor};
use calsync_domain::{CalsyncError, RetrySettings};

pub type ErrorPredicate = fn(&CalsyncError, u32) -> bool;

pub type TransientRetry = RetryExecutor<ClassifiedRetry>;

pub type RecoverableRetry = RetryExecutor<PredicateRetry<ErrorPredicate>>;

/// Exponential backoff for provider calls.
pub fn provider_retry_config(settings: &RetrySettings) -> RetryConfig {
    RetryConfig {
        max_attempts: settings.max_attempts.max(1),
        backoff: BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            base: 2.0,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        },
        jitter: Jitter::Equal,
        max_total_time: Some(Duration::from_secs(300)),
    }
}

/// Fixed schedule for channel lifecycle calls.
pub fn channel_retry_config(settings: &RetrySettings) -> RetryConfig {
    let mut delays: Vec<Duration> =
        settings.channel_backoff_secs.iter().copied().map(Duration::from_secs).collect();
    if delays.is_empty() {
        delays.push(Duration::from_secs(60));
    }
    RetryConfig {
        max_attempts: settings.channel_attempts.max(1),
        backoff: BackoffStrategy::Schedule(delays),
        jitter: Jitter::None,
        max_total_time: None,
    }
}

/// Retries errors that classify as retryable: network failures, timeouts
/// and database lock contention.
pub fn retry_transient(config: RetryConfig) -> TransientRetry {
    RetryExecutor::new(config, ClassifiedRetry)
}

/// Retries everything except configuration and credential problems.
pub fn retry_recoverable(config: RetryConfig) -> RecoverableRetry {
    RetryExecutor::new(config, PredicateRetry::new(is_recoverable as ErrorPredicate))
}

fn is_recoverable(error: &CalsyncError, _attempt: u32) -> bool {
    !matches!(error, CalsyncError::Config(_) | CalsyncError::Auth(_))
}

/// Collapse a retry failure back into the last domain error.
pub fn into_domain_error(error: RetryError<CalsyncError>) -> CalsyncError {
    match error {
        RetryError::InvalidConfiguration { message } => CalsyncError::Config(message),
        RetryError::TimeoutExceeded { elapsed, last: None } => {
            CalsyncError::Timeout(format!("retry budget exhausted after {elapsed:?}"))
        }
        other => other
            .into_source()
            .unwrap_or_else(|| CalsyncError::Internal("retry ended without an error".into())),
    }
}
