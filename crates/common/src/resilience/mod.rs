//! Resilience patterns for transient failures.
//!
//! The [`retry`] module provides the retry policy object used by provider
//! calls, channel lifecycle operations and background jobs: a bounded attempt
//! count, a backoff schedule, and a retryable-error predicate.

pub mod retry;

// Re-export retry types
pub use retry::{
    policies, BackoffStrategy, Jitter, RetryConfig, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy, RetryResult,
};
