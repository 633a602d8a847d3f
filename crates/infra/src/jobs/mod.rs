//! Background job execution for per-collection sync work and webhook chunks.

pub mod queue;

pub use queue::{JobQueueConfig, TokioJobQueue};
