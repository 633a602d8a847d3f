//! Storage primitives for the SQLite event store
//!
//! Provides an r2d2 connection pool with per-connection pragmas, a thin
//! connection/transaction wrapper, and the storage error type.

pub mod error;
pub mod sqlite;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use sqlite::{
    apply_connection_pragmas, HealthStatus, SqliteConnection, SqlitePool, SqlitePoolConfig,
    SqliteStatement, SqliteTransaction,
};
