//! Port interfaces for calendar sync
//!
//! Adapters live in `calsync-infra`; tests use in-memory doubles.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use calsync_domain::{
    Account, ChangeSet, Collection, CommitReport, EventStatus, ExternalEvent, Result, SyncMode,
    SyncState, SyncWindow, SyncedEvent, WatchChannel, WatchRequest, WritePlan,
};
use futures::future::BoxFuture;

/// Third-party calendar API
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// List events by continuation token or by time window, following every
    /// page. A stale token fails with `CalsyncError::TokenInvalid`.
    async fn list_events(&self, account: &Account, mode: &SyncMode) -> Result<ChangeSet>;

    /// Fetch one event; `None` when the provider reports it missing.
    async fn get_event_by_id(
        &self,
        account: &Account,
        external_id: &str,
    ) -> Result<Option<ExternalEvent>>;

    /// Id to status map of every event in the window, deleted ones included.
    /// A listing that cannot be completed is an error, never a partial map.
    async fn list_event_statuses(
        &self,
        account: &Account,
        window: &SyncWindow,
    ) -> Result<HashMap<String, EventStatus>>;

    async fn create_watch_channel(
        &self,
        account: &Account,
        request: &WatchRequest,
    ) -> Result<WatchChannel>;

    async fn stop_watch_channel(&self, account: &Account, channel: &WatchChannel) -> Result<()>;
}

/// Persisted synced events and their shared sources
#[async_trait]
pub trait SyncedEventRepository: Send + Sync {
    async fn has_events_for_account(&self, account_id: &str) -> Result<bool>;

    /// Rows in `collection_ids` whose external id is one of `external_ids`
    /// or whose base id is one of `base_ids`.
    async fn find_matching(
        &self,
        collection_ids: &[String],
        external_ids: &[String],
        base_ids: &[String],
    ) -> Result<Vec<SyncedEvent>>;

    /// Apply a staged plan in one transaction. Bulk update failures fall
    /// back to row-by-row writes; failed rows are reported, not raised.
    async fn commit(&self, plan: WritePlan) -> Result<CommitReport>;

    /// Rows whose start time falls inside the window.
    async fn find_in_window(
        &self,
        collection_ids: &[String],
        window: &SyncWindow,
    ) -> Result<Vec<SyncedEvent>>;

    /// Delete the given rows, skipping any whose start time lies outside
    /// the window.
    async fn delete_in_window(&self, row_ids: &[String], window: &SyncWindow) -> Result<usize>;

    /// Rows of the account's other collections that have an event source,
    /// start inside the window, and have no counterpart in `collection_id`.
    async fn rows_missing_from_collection(
        &self,
        account_id: &str,
        collection_id: &str,
        window: &SyncWindow,
    ) -> Result<Vec<SyncedEvent>>;
}

/// Per-account continuation token and channel credentials
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Stored state, or an empty state for unknown accounts.
    async fn get(&self, account_id: &str) -> Result<SyncState>;

    async fn save_token(&self, account_id: &str, token: &str) -> Result<()>;

    async fn clear_token(&self, account_id: &str) -> Result<()>;

    async fn save_channel(&self, account_id: &str, channel: &WatchChannel) -> Result<()>;

    async fn clear_channel(&self, account_id: &str) -> Result<()>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get(&self, account_id: &str) -> Result<Option<Account>>;

    async fn list_active(&self) -> Result<Vec<Account>>;
}

#[async_trait]
pub trait CollectionRepository: Send + Sync {
    async fn list_for_account(&self, account_id: &str) -> Result<Vec<Collection>>;
}

pub type JobFuture = BoxFuture<'static, Result<()>>;

/// Named unit of background work. The closure may be invoked again when the
/// queue retries a failed run.
#[derive(Clone)]
pub struct Job {
    name: String,
    run: Arc<dyn Fn() -> JobFuture + Send + Sync>,
}

impl Job {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        Self { name: name.into(), run: Arc::new(run) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self) -> JobFuture {
        (self.run)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Asynchronous worker pool
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
}
