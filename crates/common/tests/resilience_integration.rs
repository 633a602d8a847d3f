//! Integration tests for the retry executor combined with error
//! classification.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use calsync_common::resilience::policies::ClassifiedRetry;
use calsync_common::{
    BackoffStrategy, ErrorClassification, ErrorSeverity, Jitter, RetryConfig, RetryError,
    RetryExecutor,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProviderFailure {
    Unavailable,
    Throttled,
    Rejected,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl ErrorClassification for ProviderFailure {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        matches!(self, Self::Throttled).then(|| Duration::from_millis(5))
    }
}

fn executor(max_attempts: u32) -> RetryExecutor<ClassifiedRetry> {
    let config = RetryConfig {
        max_attempts,
        backoff: BackoffStrategy::Schedule(vec![
            Duration::from_millis(1),
            Duration::from_millis(2),
        ]),
        jitter: Jitter::None,
        max_total_time: None,
    };
    RetryExecutor::new(config, ClassifiedRetry)
}

#[tokio::test]
async fn classified_retry_recovers_from_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let result = executor(5)
        .execute(|| {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(ProviderFailure::Unavailable),
                    1 => Err(ProviderFailure::Throttled),
                    _ => Ok("events"),
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "events");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn classified_retry_stops_on_rejection() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    let result: Result<(), _> = executor(5)
        .execute(|| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderFailure::Rejected)
            }
        })
        .await;

    assert!(matches!(result, Err(RetryError::NonRetryable { source: ProviderFailure::Rejected })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_retries_surface_last_failure() {
    let result: Result<(), _> =
        executor(3).execute(|| async { Err(ProviderFailure::Unavailable) }).await;

    match result {
        Err(RetryError::AttemptsExhausted { attempts, source }) => {
            assert_eq!(attempts, 3);
            assert_eq!(source, ProviderFailure::Unavailable);
        }
        other => panic!("unexpected: {other:?}"),
    }
}
