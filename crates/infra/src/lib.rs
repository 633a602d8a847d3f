//! # Calsync Infrastructure
//!
//! Adapters for the ports defined in `calsync-core`.
//!
//! This crate contains:
//! - SQLite repositories and schema management
//! - The Google Calendar provider over `reqwest`
//! - The Tokio job queue and the cron scheduler
//! - The axum webhook receiver
//! - Configuration loading
//!
//! ## Architecture
//! - Implements traits defined in `calsync-core`
//! - Contains all I/O: database, network, timers

pub mod config;
pub mod database;
pub mod errors;
pub mod http;
pub mod integrations;
pub mod jobs;
pub mod scheduling;

pub use database::*;
pub use errors::{status_error, InfraError};
pub use http::*;
pub use integrations::*;
pub use jobs::{JobQueueConfig, TokioJobQueue};
pub use scheduling::{SchedulerError, SyncScheduler, SyncSchedulerConfig};
