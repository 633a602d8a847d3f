//! SQLite-backed accounts and collections.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_common::storage::SqlitePool;
use calsync_core::{AccountRepository, CollectionRepository};
use calsync_domain::{Account, Collection, Result};
use rusqlite::{params, Row};
use tokio::task;
use tracing::instrument;

use crate::errors::{join_error, InfraError};

pub struct SqliteAccountRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteAccountRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Register or refresh an account.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub fn upsert(&self, account: &Account) -> Result<()> {
        let conn = self.pool.get_connection().map_err(InfraError::from)?;
        conn.execute(
            "INSERT INTO accounts (id, email, access_token, active) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 email = excluded.email,
                 access_token = excluded.access_token,
                 active = excluded.active",
            params![account.id, account.email, account.access_token, account.active],
        )
        .map_err(InfraError::from)?;
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    #[instrument(skip(self))]
    async fn get(&self, account_id: &str) -> Result<Option<Account>> {
        let pool = Arc::clone(&self.pool);
        let account_id = account_id.to_string();
        task::spawn_blocking(move || -> Result<Option<Account>> {
            let conn = pool.get_connection().map_err(InfraError::from)?;
            let mut stmt = conn
                .prepare("SELECT id, email, access_token, active FROM accounts WHERE id = ?1")
                .map_err(InfraError::from)?;
            let rows =
                stmt.query_map(params![account_id], map_account).map_err(InfraError::from)?;
            Ok(rows.into_iter().next())
        })
        .await
        .map_err(join_error)?
    }

    #[instrument(skip(self))]
    async fn list_active(&self) -> Result<Vec<Account>> {
        let pool = Arc::clone(&self.pool);
        task::spawn_blocking(move || -> Result<Vec<Account>> {
            let conn = pool.get_connection().map_err(InfraError::from)?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, email, access_token, active FROM accounts
                     WHERE active = 1 ORDER BY id",
                )
                .map_err(InfraError::from)?;
            let rows = stmt.query_map([], map_account).map_err(InfraError::from)?;
            Ok(rows)
        })
        .await
        .map_err(join_error)?
    }
}

fn map_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        access_token: row.get(2)?,
        active: row.get(3)?,
    })
}

pub struct SqliteCollectionRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteCollectionRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn upsert(&self, collection: &Collection) -> Result<()> {
        let conn = self.pool.get_connection().map_err(InfraError::from)?;
        conn.execute(
            "INSERT INTO collections (id, account_id, name) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET account_id = excluded.account_id, name = excluded.name",
            params![collection.id, collection.account_id, collection.name],
        )
        .map_err(InfraError::from)?;
        Ok(())
    }
}

#[async_trait]
impl CollectionRepository for SqliteCollectionRepository {
    #[instrument(skip(self))]
    async fn list_for_account(&self, account_id: &str) -> Result<Vec<Collection>> {
        let pool = Arc::clone(&self.pool);
        let account_id = account_id.to_string();
        task::spawn_blocking(move || -> Result<Vec<Collection>> {
            let conn = pool.get_connection().map_err(InfraError::from)?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, account_id, name FROM collections
                     WHERE account_id = ?1 ORDER BY id",
                )
                .map_err(InfraError::from)?;
            let rows = stmt
                .query_map(params![account_id], |row| {
                    Ok(Collection { id: row.get(0)?, account_id: row.get(1)?, name: row.get(2)? })
                })
                .map_err(InfraError::from)?;
            Ok(rows)
        })
        .await
        .map_err(join_error)?
    }
}
