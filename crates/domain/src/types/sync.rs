//! Persisted sync records and the write plan that moves between the
//! synchronizer and the repository.

use std::fmt;
use std::ops::AddAssign;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::event::{EventFields, ExternalEvent};
use super::window::SyncWindow;

/// Calendar account whose provider calendar is mirrored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub access_token: String,
    pub active: bool,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .field("active", &self.active)
            .finish()
    }
}

/// Internal consumer of an account's events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub account_id: String,
    pub name: String,
}

/// One stored row per (collection, external id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedEvent {
    pub id: String,
    pub collection_id: String,
    pub owner_id: String,
    pub external_id: String,
    pub event_source_id: Option<String>,
    pub fields: EventFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncedEvent {
    pub fn start_date(&self) -> NaiveDate {
        self.fields.start_date()
    }
}

/// Shared per-owner record of one provider event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSource {
    pub id: String,
    pub owner_id: String,
    pub external_id: String,
    pub payload_history: Vec<serde_json::Value>,
    pub last_synced_at: DateTime<Utc>,
}

/// Active push-notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchChannel {
    pub channel_id: String,
    pub resource_id: String,
    pub expires_at: DateTime<Utc>,
}

impl WatchChannel {
    /// Still usable at `now` with at least `margin` left before expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at > now + margin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRequest {
    pub channel_id: String,
    pub callback_url: String,
    pub ttl_secs: i64,
    pub resource: String,
    pub token: String,
}

/// Per-account continuation token and channel credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub account_id: String,
    pub sync_token: Option<String>,
    pub channel: Option<WatchChannel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    Incremental { token: String },
    Full { window: SyncWindow },
}

impl SyncMode {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full { .. })
    }
}

/// Result of one physical provider fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub events: Vec<ExternalEvent>,
    pub next_sync_token: Option<String>,
    pub mode: SyncMode,
}

/* -------------------------------------------------------------------------- */
/* Write plan                                                                 */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteScope {
    /// Only the row whose external id matches exactly.
    Exact,
    /// The row with the base id and every row carrying it as prefix.
    Series,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub collection_id: String,
    pub external_id: String,
    pub scope: DeleteScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncedEvent {
    pub collection_id: String,
    pub owner_id: String,
    pub external_id: String,
    pub fields: EventFields,
}

/// Field assignment for an existing row; `external_id` may differ from the
/// stored one when a single event was promoted to a recurring occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub row_id: String,
    pub external_id: String,
    pub fields: EventFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceUpsert {
    pub owner_id: String,
    pub external_id: String,
    pub payload: serde_json::Value,
    pub synced_at: DateTime<Utc>,
}

/// Staged writes for one unit of work, applied in a single transaction in
/// this order: sources, deletions, updates, inserts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    pub sources: Vec<SourceUpsert>,
    pub deletions: Vec<Deletion>,
    pub updates: Vec<RowUpdate>,
    pub inserts: Vec<NewSyncedEvent>,
}

impl WritePlan {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.updates.is_empty() && self.inserts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub external_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failures: Vec<RowFailure>,
}

/// Counts returned by every apply path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ApplyReport {
    pub fn record_commit(&mut self, commit: &CommitReport) {
        self.created += commit.inserted;
        self.updated += commit.updated;
        self.deleted += commit.deleted;
        self.errors += commit.failures.len();
    }

    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl AddAssign for ApplyReport {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.updated += rhs.updated;
        self.deleted += rhs.deleted;
        self.skipped += rhs.skipped;
        self.errors += rhs.errors;
    }
}
