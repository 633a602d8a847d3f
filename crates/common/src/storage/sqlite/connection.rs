//! SQLite connection wrapper
//!
//! Thin wrappers over pooled rusqlite handles that map every failure into
//! [`StorageError`].

use std::ops::{Deref, DerefMut};

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection as RusqliteConnection, Params, Row, Statement as RusqliteStatement};
use tracing::instrument;

use crate::storage::error::{StorageError, StorageResult};

/// Pooled SQLite connection
///
/// The connection is returned to the pool when dropped.
pub struct SqliteConnection {
    inner: PooledConnection<SqliteConnectionManager>,
}

impl SqliteConnection {
    pub fn new(conn: PooledConnection<SqliteConnectionManager>) -> Self {
        Self { inner: conn }
    }

    #[instrument(skip(self, params), fields(sql = %sql))]
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> StorageResult<usize> {
        self.inner.execute(sql, params).map_err(StorageError::from)
    }

    /// Execute a SQL query that returns a single row
    #[instrument(skip(self, params, f), fields(sql = %sql))]
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> StorageResult<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> Result<T, rusqlite::Error>,
    {
        self.inner.query_row(sql, params, f).map_err(StorageError::from)
    }

    /// Prepare a SQL statement for efficient repeated execution
    #[instrument(skip(self), fields(sql = %sql))]
    pub fn prepare(&self, sql: &str) -> StorageResult<SqliteStatement<'_>> {
        let stmt = self.inner.prepare(sql).map_err(StorageError::from)?;
        Ok(SqliteStatement::new(stmt))
    }

    /// Begin a transaction. Uncommitted transactions roll back on drop.
    #[instrument(skip(self))]
    pub fn transaction(&mut self) -> StorageResult<SqliteTransaction<'_>> {
        let tx = self.inner.transaction().map_err(StorageError::from)?;
        Ok(SqliteTransaction { inner: tx })
    }
}

impl Deref for SqliteConnection {
    type Target = RusqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for SqliteConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Prepared statement wrapper
pub struct SqliteStatement<'conn> {
    inner: RusqliteStatement<'conn>,
}

impl<'conn> SqliteStatement<'conn> {
    pub fn new(stmt: RusqliteStatement<'conn>) -> Self {
        Self { inner: stmt }
    }

    pub fn execute<P: Params>(&mut self, params: P) -> StorageResult<usize> {
        self.inner.execute(params).map_err(StorageError::from)
    }

    /// Query with the statement and collect mapped rows
    pub fn query_map<T, P, F>(&mut self, params: P, mut f: F) -> StorageResult<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> Result<T, rusqlite::Error>,
    {
        let rows = self.inner.query_map(params, |row| f(row)).map_err(StorageError::from)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }
}

/// Transaction wrapper; rolls back on drop unless [`commit`](Self::commit)
/// was called.
pub struct SqliteTransaction<'conn> {
    inner: rusqlite::Transaction<'conn>,
}

impl SqliteTransaction<'_> {
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> StorageResult<usize> {
        self.inner.execute(sql, params).map_err(StorageError::from)
    }

    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> StorageResult<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> Result<T, rusqlite::Error>,
    {
        self.inner.query_row(sql, params, f).map_err(StorageError::from)
    }

    pub fn prepare(&self, sql: &str) -> StorageResult<SqliteStatement<'_>> {
        let stmt = self.inner.prepare(sql).map_err(StorageError::from)?;
        Ok(SqliteStatement::new(stmt))
    }

    #[instrument(skip(self))]
    pub fn commit(self) -> StorageResult<()> {
        self.inner.commit().map_err(StorageError::from)
    }

    pub fn rollback(self) -> StorageResult<()> {
        self.inner.rollback().map_err(StorageError::from)
    }
}
