//! In-flight lease store.
//!
//! Concurrent triggers for the same unit of work (two webhook deliveries for
//! one account, a webhook racing the periodic delta sync) are deduplicated by
//! taking a named lease before the token-consuming fetch. See [`LeaseStore`]
//! for the eviction rules.

mod lease;

pub use lease::{Lease, LeaseGuard, LeaseStore};
