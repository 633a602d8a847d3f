//! Infrastructure error conversions

mod conversions;

pub use conversions::{join_error, status_error, InfraError};
