//! # Calsync Core
//!
//! Sync business logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for the provider, storage and job queue
//! - The synchronizer, reconciler, orchestrator and webhook path
//!
//! ## Architecture Principles
//! - Only depends on `calsync-common` and `calsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod calendar_sync;

pub use calendar_sync::*;
