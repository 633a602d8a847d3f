//! Retry policy object shared by provider calls, channel lifecycle operations
//! and background jobs.
//!
//! A retry is described by three independent pieces:
//! - a [`RetryConfig`] (attempt budget, backoff schedule, jitter, deadline),
//! - a [`RetryPolicy`] predicate that classifies each failure,
//! - the [`RetryExecutor`] that drives the loop.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retry attempts have been exhausted; carries the last failure
    #[error("All retry attempts exhausted after {attempts} tries: {source}")]
    AttemptsExhausted { attempts: u32, source: E },

    /// The operation failed with a non-retryable error
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable { source: E },

    /// The retry strategy configuration is invalid
    #[error("Invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The total time budget ran out before the operation succeeded
    #[error("Retry timeout exceeded after {elapsed:?}")]
    TimeoutExceeded { elapsed: Duration, last: Option<E> },
}

impl<E> RetryError<E> {
    /// Returns the last error produced by the operation, if any.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::AttemptsExhausted { source, .. } | Self::NonRetryable { source } => Some(source),
            Self::TimeoutExceeded { last, .. } => last,
            Self::InvalidConfiguration { .. } => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Determine if the error should be retried and optionally provide a custom
    /// delay
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the default backoff delay
    Retry,
    /// Retry the operation with a custom delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff: initial_delay * base^attempt
    Exponential { initial_delay: Duration, base: f64, max_delay: Duration },
    /// Explicit per-attempt delays; the last entry repeats once exhausted
    Schedule(Vec<Duration>),
}

impl BackoffStrategy {
    /// Calculate the delay that follows the given (0-based) failed attempt
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { initial_delay, base, max_delay } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let delay = initial_delay.as_millis() as f64 * base.powi(exponent);
                let delay_ms = delay.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(delay_ms)
            }
            Self::Schedule(delays) => {
                let index = usize::try_from(attempt).unwrap_or(usize::MAX);
                delays.get(index).or_else(|| delays.last()).copied().unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter
    None,
    /// Equal jitter: calculated_delay/2 to calculated_delay
    Equal,
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Self::None => delay,
            Self::Equal => {
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                let half = delay_ms / 2;
                Duration::from_millis(half + random_up_to(delay_ms - half))
            }
        }
    }
}

fn random_up_to(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=max)
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Jitter type for randomizing delays
    pub jitter: Jitter,
    /// Maximum total time to spend retrying
    pub max_total_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial_delay: Duration::from_millis(100),
                base: 2.0,
                max_delay: Duration::from_secs(30),
            },
            jitter: Jitter::Equal,
            max_total_time: Some(Duration::from_secs(300)),
        }
    }
}

impl RetryConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RetryError<()>> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfiguration {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }

        match &self.backoff {
            BackoffStrategy::Exponential { base, .. } if *base <= 0.0 => {
                Err(RetryError::InvalidConfiguration {
                    message: "exponential base must be greater than 0".to_string(),
                })
            }
            BackoffStrategy::Schedule(delays) if delays.is_empty() => {
                Err(RetryError::InvalidConfiguration {
                    message: "backoff schedule must contain at least one delay".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(RetryError::InvalidConfiguration { message }) = self.config.validate() {
            return Err(RetryError::InvalidConfiguration { message });
        }

        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            debug!(attempt = attempt + 1, "executing operation");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let delay = match self.policy.should_retry(&error, attempt) {
                RetryDecision::Stop => {
                    debug!(error = %error, "retry policy declined to retry");
                    return Err(RetryError::NonRetryable { source: error });
                }
                RetryDecision::Retry => {
                    let base = self.config.backoff.calculate_delay(attempt);
                    self.config.jitter.apply(base)
                }
                RetryDecision::RetryAfter(custom) => custom,
            };

            let attempts = attempt + 1;
            if attempts >= self.config.max_attempts {
                warn!(attempts, error = %error, "all retry attempts exhausted");
                return Err(RetryError::AttemptsExhausted { attempts, source: error });
            }

            if let Some(max_time) = self.config.max_total_time {
                let elapsed = started.elapsed();
                if elapsed + delay >= max_time {
                    warn!(?elapsed, attempts, "retry time budget exceeded");
                    return Err(RetryError::TimeoutExceeded { elapsed, last: Some(error) });
                }
            }

            warn!(attempt = attempts, ?delay, error = %error, "operation failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::{RetryDecision, RetryPolicy};
    use crate::error::ErrorClassification;

    /// Predicate-based retry policy
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }

    /// Retries errors that classify themselves as retryable, honouring any
    /// suggested `retry_after` delay.
    #[derive(Debug, Clone, Copy)]
    pub struct ClassifiedRetry;

    impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            error.retry_after().map_or(RetryDecision::Retry, RetryDecision::RetryAfter)
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for retry strategies and policies
    //!
    //! Tests cover backoff strategies (fixed, exponential, schedule),
    //! jitter bounds, executor behavior, and policy implementations.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::policies::*;
    use super::*;

    fn quick_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: BackoffStrategy::Fixed(Duration::from_millis(1)),
            jitter: Jitter::None,
            max_total_time: None,
        }
    }

    fn retry_all() -> PredicateRetry<fn(&String, u32) -> bool> {
        PredicateRetry::new((|_, _| true) as fn(&String, u32) -> bool)
    }

    /// Validates `BackoffStrategy::Fixed` behavior for the backoff strategy
    /// fixed scenario.
    ///
    /// Assertions:
    /// - Confirms every attempt yields the same 100ms delay.
    #[test]
    fn test_backoff_strategy_fixed() {
        let strategy = BackoffStrategy::Fixed(Duration::from_millis(100));

        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(5), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(100), Duration::from_millis(100));
    }

    /// Validates `BackoffStrategy::Exponential` behavior for the backoff
    /// strategy exponential scenario.
    ///
    /// Assertions:
    /// - Confirms doubling per attempt.
    /// - Ensures the delay is capped at `max_delay`.
    #[test]
    fn test_backoff_strategy_exponential() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(100),
            base: 2.0,
            max_delay: Duration::from_secs(10),
        };

        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(3), Duration::from_millis(800));
        assert!(strategy.calculate_delay(20) <= Duration::from_secs(10));
    }

    /// Validates `BackoffStrategy::Schedule` for the channel setup schedule.
    ///
    /// Assertions:
    /// - Confirms each attempt maps to its schedule slot.
    /// - Confirms attempts past the end reuse the last slot.
    #[test]
    fn test_backoff_strategy_schedule() {
        let strategy = BackoffStrategy::Schedule(vec![
            Duration::from_secs(60),
            Duration::from_secs(300),
            Duration::from_secs(900),
        ]);

        assert_eq!(strategy.calculate_delay(0), Duration::from_secs(60));
        assert_eq!(strategy.calculate_delay(1), Duration::from_secs(300));
        assert_eq!(strategy.calculate_delay(2), Duration::from_secs(900));
        assert_eq!(strategy.calculate_delay(7), Duration::from_secs(900));
    }

    #[test]
    fn test_jitter_none() {
        let delay = Duration::from_millis(100);
        assert_eq!(Jitter::None.apply(delay), delay);
    }

    /// Validates equal jitter stays in `[delay/2, delay]`.
    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..50 {
            let equal = Jitter::Equal.apply(delay);
            assert!(equal >= Duration::from_millis(50));
            assert!(equal <= delay);
        }
    }

    /// Validates `RetryConfig::validate` rejects unusable settings.
    ///
    /// Assertions:
    /// - Zero attempts is rejected.
    /// - An empty schedule is rejected.
    #[test]
    fn test_retry_config_validation() {
        let mut config = RetryConfig::default();
        assert!(config.validate().is_ok());

        config.max_attempts = 0;
        assert!(config.validate().is_err());

        let empty =
            RetryConfig { backoff: BackoffStrategy::Schedule(Vec::new()), ..quick_config(3) };
        assert!(matches!(empty.validate(), Err(RetryError::InvalidConfiguration { .. })));
    }

    /// Validates the executor retries transient failures until success.
    ///
    /// Assertions:
    /// - Confirms the result is the successful value.
    /// - Confirms the operation ran three times.
    #[tokio::test]
    async fn test_executor_succeeds_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(quick_config(5), retry_all());

        let counter = Arc::clone(&calls);
        let result: RetryResult<u32, String> = executor
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {n} failed"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Validates exhaustion keeps the final error.
    ///
    /// Assertions:
    /// - Confirms `AttemptsExhausted` reports the attempt count.
    /// - Confirms the source is the last error produced.
    #[tokio::test]
    async fn test_executor_exhaustion_keeps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(quick_config(3), retry_all());

        let counter = Arc::clone(&calls);
        let result: RetryResult<(), String> = executor
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("failure {n}"))
                }
            })
            .await;

        match result {
            Err(RetryError::AttemptsExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(source, "failure 3");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Validates non-retryable errors stop immediately.
    ///
    /// Assertions:
    /// - Confirms `NonRetryable` is returned after a single call.
    #[tokio::test]
    async fn test_executor_non_retryable_stops() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor =
            RetryExecutor::new(quick_config(3), PredicateRetry::new(|_: &String, _| false));

        let counter = Arc::clone(&calls);
        let result: RetryResult<(), String> = executor
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_predicate_retry_filters_errors() {
        let executor = RetryExecutor::new(
            quick_config(4),
            PredicateRetry::new(|e: &String, _| e.starts_with("transient")),
        );
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: RetryResult<(), String> = executor
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err("transient blip".to_string())
                    } else {
                        Err("permanent".to_string())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap_err().into_source().as_deref(), Some("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Validates the total time budget is enforced before sleeping.
    ///
    /// Assertions:
    /// - Confirms `TimeoutExceeded` carries the last error.
    #[tokio::test]
    async fn test_executor_time_budget() {
        let config = RetryConfig {
            backoff: BackoffStrategy::Fixed(Duration::from_secs(60)),
            max_total_time: Some(Duration::from_secs(1)),
            ..quick_config(10)
        };
        let executor = RetryExecutor::new(config, retry_all());

        let result: RetryResult<(), String> =
            executor.execute(|| async { Err("slow".to_string()) }).await;

        match result {
            Err(RetryError::TimeoutExceeded { last, .. }) => {
                assert_eq!(last.as_deref(), Some("slow"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
