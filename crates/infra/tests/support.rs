//! Shared helpers for `calsync-infra` integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use calsync_domain::{Account, Collection, EventFields, NewSyncedEvent, SourceUpsert};
use calsync_infra::database::{DbManager, SqliteAccountRepository, SqliteCollectionRepository};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

pub const ACCOUNT: &str = "acct-1";

/// Migrated database in a temporary directory that lives as long as the
/// harness.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        Self::with_pool_size(4)
    }

    pub fn with_pool_size(pool_size: u32) -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let manager = DbManager::new(temp_dir.path().join("calsync.db"), pool_size)
            .expect("db manager should be created");
        manager.run_migrations().expect("schema should apply");
        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }

    /// Database with [`ACCOUNT`] and the given collections already stored.
    pub fn seeded(collection_ids: &[&str]) -> Self {
        let db = Self::new();
        let accounts = SqliteAccountRepository::new(db.manager.pool().clone());
        accounts.upsert(&account()).expect("account should be stored");
        let collections = SqliteCollectionRepository::new(db.manager.pool().clone());
        for id in collection_ids {
            collections.upsert(&collection(id)).expect("collection should be stored");
        }
        db
    }

    pub fn count(&self, sql: &str) -> i64 {
        let conn = self.manager.get_connection().expect("connection should be available");
        conn.query_row(sql, [], |row| row.get(0)).expect("count query should succeed")
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

pub fn account() -> Account {
    Account {
        id: ACCOUNT.into(),
        email: "owner@example.com".into(),
        access_token: "access-token".into(),
        active: true,
    }
}

pub fn collection(id: &str) -> Collection {
    Collection { id: id.into(), account_id: ACCOUNT.into(), name: format!("Collection {id}") }
}

/// Fixed instant `days` after 2026-03-02 09:00 UTC.
pub fn at(days: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::days(days)
}

pub fn fields(name: &str, start: DateTime<Utc>) -> EventFields {
    EventFields {
        name: name.into(),
        start_at: start,
        end_at: start + Duration::hours(1),
        location: "-".into(),
        link: None,
        description: None,
        guests: vec!["guest@example.com".into()],
    }
}

pub fn new_row(collection_id: &str, external_id: &str, start: DateTime<Utc>) -> NewSyncedEvent {
    NewSyncedEvent {
        collection_id: collection_id.into(),
        owner_id: ACCOUNT.into(),
        external_id: external_id.into(),
        fields: fields(&format!("Meeting {external_id}"), start),
    }
}

pub fn source(external_id: &str) -> SourceUpsert {
    SourceUpsert {
        owner_id: ACCOUNT.into(),
        external_id: external_id.into(),
        payload: serde_json::json!({ "id": external_id }),
        synced_at: at(0),
    }
}
