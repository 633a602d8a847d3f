//! SQLite-backed sync state: continuation token and channel credentials per
//! account.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_common::storage::{SqliteConnection, SqlitePool, StorageResult};
use calsync_core::SyncStateRepository;
use calsync_domain::{Result, SyncState, WatchChannel};
use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio::task;
use tracing::{debug, instrument};

use crate::errors::{join_error, InfraError};

pub struct SqliteSyncStateRepository {
    pool: Arc<SqlitePool>,
}

impl SqliteSyncStateRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Upsert one column group, creating the row on first write.
    async fn write<F>(&self, account_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&SqliteConnection, &str, i64) -> StorageResult<usize> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        let account_id = account_id.to_string();
        task::spawn_blocking(move || -> Result<()> {
            let now = Utc::now().timestamp();
            let conn = pool.get_connection().map_err(InfraError::from)?;
            conn.execute(
                "INSERT OR IGNORE INTO sync_state (account_id, updated_at) VALUES (?1, ?2)",
                params![account_id, now],
            )
            .map_err(InfraError::from)?;
            update(&conn, &account_id, now).map_err(InfraError::from)?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    #[instrument(skip(self))]
    async fn get(&self, account_id: &str) -> Result<SyncState> {
        let pool = Arc::clone(&self.pool);
        let key = account_id.to_string();
        let row = task::spawn_blocking(move || -> Result<_> {
            let conn = pool.get_connection().map_err(InfraError::from)?;
            let mut stmt = conn
                .prepare(
                    "SELECT sync_token, channel_id, resource_id, channel_expires_at
                     FROM sync_state WHERE account_id = ?1",
                )
                .map_err(InfraError::from)?;
            let rows = stmt
                .query_map(params![key], |row| {
                    let token: Option<String> = row.get(0)?;
                    let channel_id: Option<String> = row.get(1)?;
                    let resource_id: Option<String> = row.get(2)?;
                    let expires_at: Option<i64> = row.get(3)?;
                    Ok((token, channel_id, resource_id, expires_at))
                })
                .map_err(InfraError::from)?;
            Ok(rows.into_iter().next())
        })
        .await
        .map_err(join_error)??;

        let Some((sync_token, channel_id, resource_id, expires_at)) = row else {
            return Ok(SyncState { account_id: account_id.to_string(), ..SyncState::default() });
        };

        let channel = match (channel_id, resource_id, expires_at.and_then(from_secs)) {
            (Some(channel_id), Some(resource_id), Some(expires_at)) => {
                Some(WatchChannel { channel_id, resource_id, expires_at })
            }
            _ => None,
        };
        Ok(SyncState { account_id: account_id.to_string(), sync_token, channel })
    }

    #[instrument(skip(self, token))]
    async fn save_token(&self, account_id: &str, token: &str) -> Result<()> {
        let token = token.to_string();
        self.write(account_id, move |conn, id, now| {
            conn.execute(
                "UPDATE sync_state SET sync_token = ?2, updated_at = ?3 WHERE account_id = ?1",
                params![id, token, now],
            )
        })
        .await?;
        debug!("sync token stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_token(&self, account_id: &str) -> Result<()> {
        self.write(account_id, |conn, id, now| {
            conn.execute(
                "UPDATE sync_state SET sync_token = NULL, updated_at = ?2 WHERE account_id = ?1",
                params![id, now],
            )
        })
        .await
    }

    #[instrument(skip(self, channel), fields(channel_id = %channel.channel_id))]
    async fn save_channel(&self, account_id: &str, channel: &WatchChannel) -> Result<()> {
        let channel = channel.clone();
        self.write(account_id, move |conn, id, now| {
            conn.execute(
                "UPDATE sync_state
                 SET channel_id = ?2, resource_id = ?3, channel_expires_at = ?4, updated_at = ?5
                 WHERE account_id = ?1",
                params![
                    id,
                    channel.channel_id,
                    channel.resource_id,
                    channel.expires_at.timestamp(),
                    now
                ],
            )
        })
        .await
    }

    #[instrument(skip(self))]
    async fn clear_channel(&self, account_id: &str) -> Result<()> {
        self.write(account_id, |conn, id, now| {
            conn.execute(
                "UPDATE sync_state
                 SET channel_id = NULL, resource_id = NULL, channel_expires_at = NULL,
                     updated_at = ?2
                 WHERE account_id = ?1",
                params![id, now],
            )
        })
        .await
    }
}

fn from_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
