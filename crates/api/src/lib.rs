//! # Calsync App
//!
//! Composition root and entry point for the `calsync` service.
//!
//! ## Architecture
//! - Depends on `common`, `domain`, `core`, and `infra`
//! - [`AppContext`] wires the repositories, provider and sync services
//! - The binary runs the webhook receiver and the cron scheduler

pub mod context;
pub mod utils;

pub use context::*;
