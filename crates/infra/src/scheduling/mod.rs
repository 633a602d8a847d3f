//! Cron-driven background sweeps
//!
//! [`SyncScheduler`] owns the periodic delta sync and the channel renewal
//! sweep. Lifecycle is explicit: `start`/`stop`, tracked join handles, a
//! cancellation token, and a timeout around every async step.

pub mod error;
pub mod sync_scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use sync_scheduler::{ScheduledTask, SyncScheduler, SyncSchedulerConfig};
