//! # Calsync Domain
//!
//! Business domain types for calendar delta sync.
//!
//! This crate contains:
//! - Provider event shapes, persisted sync records and the write plan
//! - Identity resolution for recurring occurrence ids
//! - Domain error types and Result definitions
//! - Configuration structures and constants
//!
//! ## Architecture
//! - No dependencies on other calsync crates
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
// Re-export identity helpers
pub use utils::identity::{
    extract_base_id, extract_occurrence_date, is_occurrence, occurrence_key, IdShape,
};
