//! Database connection manager backed by the shared SQLite pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use calsync_common::storage::{SqliteConnection, SqlitePool, SqlitePoolConfig};
use calsync_domain::{CalsyncError, Result};
use rusqlite::params;
use tracing::info;

use crate::errors::InfraError;

pub const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Database manager that wraps an [`SqlitePool`].
pub struct DbManager {
    pool: Arc<SqlitePool>,
    path: PathBuf,
}

impl DbManager {
    /// Open (or create) the database file with the given pool size.
    pub fn new<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let config = SqlitePoolConfig::default().with_max_size(pool_size.max(1));
        let pool = SqlitePool::new(&path, config).map_err(InfraError::from)?;

        info!(
            db_path = %path.display(),
            max_connections = pool_size.max(1),
            "sqlite pool initialised"
        );
        Ok(Self { pool: Arc::new(pool), path })
    }

    pub fn pool(&self) -> &Arc<SqlitePool> {
        &self.pool
    }

    pub fn get_connection(&self) -> Result<SqliteConnection> {
        Ok(self.pool.get_connection().map_err(InfraError::from)?)
    }

    /// Ensure the full schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA_SQL).map_err(InfraError::from)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at)
             VALUES (?1, CAST(strftime('%s','now') AS INTEGER))",
            params![SCHEMA_VERSION],
        )
        .map_err(InfraError::from)?;
        info!(version = SCHEMA_VERSION, "schema ready");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire a connection and run a trivial query.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        let one: i32 =
            conn.query_row("SELECT 1", [], |row| row.get(0)).map_err(InfraError::from)?;
        if one != 1 {
            return Err(CalsyncError::Database("health check returned unexpected value".into()));
        }
        Ok(())
    }
}
