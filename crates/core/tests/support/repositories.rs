//! In-memory port implementations with SQL-equivalent semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use calsync_core::{
    AccountRepository, CollectionRepository, Job, JobQueue, SyncStateRepository,
    SyncedEventRepository,
};
use calsync_domain::{
    extract_base_id, Account, CalsyncError, Collection, CommitReport, DeleteScope, EventSource,
    Result as DomainResult, SyncState, SyncWindow, SyncedEvent, WatchChannel, WritePlan,
};
use chrono::Utc;
use uuid::Uuid;

#[derive(Default)]
struct EventStore {
    rows: Vec<SyncedEvent>,
    sources: Vec<EventSource>,
    commits: usize,
    failing_commits: usize,
}

/// Mirrors the SQLite repository: unique (collection, external id), source
/// upserts first, inserts that hit an existing key update it instead.
#[derive(Default, Clone)]
pub struct InMemoryEventRepository {
    store: Arc<Mutex<EventStore>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, row: SyncedEvent) {
        self.store.lock().unwrap().rows.push(row);
    }

    pub fn rows(&self) -> Vec<SyncedEvent> {
        self.store.lock().unwrap().rows.clone()
    }

    pub fn rows_in(&self, collection_id: &str) -> Vec<SyncedEvent> {
        let mut rows: Vec<SyncedEvent> =
            self.rows().into_iter().filter(|r| r.collection_id == collection_id).collect();
        rows.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        rows
    }

    pub fn external_ids_in(&self, collection_id: &str) -> Vec<String> {
        self.rows_in(collection_id).into_iter().map(|r| r.external_id).collect()
    }

    pub fn sources(&self) -> Vec<EventSource> {
        self.store.lock().unwrap().sources.clone()
    }

    pub fn commits(&self) -> usize {
        self.store.lock().unwrap().commits
    }

    /// The next `times` commits fail with a lock error and write nothing.
    pub fn fail_next_commits(&self, times: usize) {
        self.store.lock().unwrap().failing_commits = times;
    }
}

#[async_trait]
impl SyncedEventRepository for InMemoryEventRepository {
    async fn has_events_for_account(&self, account_id: &str) -> DomainResult<bool> {
        Ok(self.store.lock().unwrap().rows.iter().any(|r| r.owner_id == account_id))
    }

    async fn find_matching(
        &self,
        collection_ids: &[String],
        external_ids: &[String],
        base_ids: &[String],
    ) -> DomainResult<Vec<SyncedEvent>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|r| collection_ids.contains(&r.collection_id))
            .filter(|r| {
                external_ids.contains(&r.external_id)
                    || base_ids.iter().any(|b| b == extract_base_id(&r.external_id))
            })
            .cloned()
            .collect())
    }

    async fn commit(&self, plan: WritePlan) -> DomainResult<CommitReport> {
        let mut guard = self.store.lock().unwrap();
        let store = &mut *guard;
        if store.failing_commits > 0 {
            store.failing_commits -= 1;
            return Err(CalsyncError::Busy("database is locked".into()));
        }
        let mut report = CommitReport::default();
        store.commits += 1;

        for source in plan.sources {
            let existing = store
                .sources
                .iter_mut()
                .find(|s| s.owner_id == source.owner_id && s.external_id == source.external_id);
            match existing {
                Some(existing) => {
                    existing.payload_history.push(source.payload);
                    existing.last_synced_at = source.synced_at;
                }
                None => store.sources.push(EventSource {
                    id: Uuid::now_v7().to_string(),
                    owner_id: source.owner_id,
                    external_id: source.external_id,
                    payload_history: vec![source.payload],
                    last_synced_at: source.synced_at,
                }),
            }
        }

        for deletion in plan.deletions {
            let before = store.rows.len();
            store.rows.retain(|r| {
                let hit = match deletion.scope {
                    DeleteScope::Exact => r.external_id == deletion.external_id,
                    DeleteScope::Series => {
                        r.external_id == deletion.external_id
                            || r.external_id.starts_with(&format!("{}_", deletion.external_id))
                    }
                };
                !(r.collection_id == deletion.collection_id && hit)
            });
            report.deleted += before - store.rows.len();
        }

        let now = Utc::now();
        for update in plan.updates {
            if let Some(row) = store.rows.iter_mut().find(|r| r.id == update.row_id) {
                row.external_id = update.external_id;
                row.fields = update.fields;
                row.updated_at = now;
                report.updated += 1;
            }
        }

        for insert in plan.inserts {
            let source_id = store
                .sources
                .iter()
                .find(|s| s.owner_id == insert.owner_id && s.external_id == insert.external_id)
                .map(|s| s.id.clone());
            let existing = store.rows.iter_mut().find(|r| {
                r.collection_id == insert.collection_id && r.external_id == insert.external_id
            });
            match existing {
                Some(row) => {
                    row.fields = insert.fields;
                    row.updated_at = now;
                    report.updated += 1;
                }
                None => {
                    store.rows.push(SyncedEvent {
                        id: Uuid::now_v7().to_string(),
                        collection_id: insert.collection_id,
                        owner_id: insert.owner_id,
                        external_id: insert.external_id,
                        event_source_id: source_id,
                        fields: insert.fields,
                        created_at: now,
                        updated_at: now,
                    });
                    report.inserted += 1;
                }
            }
        }

        Ok(report)
    }

    async fn find_in_window(
        &self,
        collection_ids: &[String],
        window: &SyncWindow,
    ) -> DomainResult<Vec<SyncedEvent>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|r| collection_ids.contains(&r.collection_id))
            .filter(|r| window.contains(r.fields.start_at))
            .cloned()
            .collect())
    }

    async fn delete_in_window(
        &self,
        row_ids: &[String],
        window: &SyncWindow,
    ) -> DomainResult<usize> {
        let mut guard = self.store.lock().unwrap();
        let store = &mut *guard;
        let before = store.rows.len();
        store.rows.retain(|r| !(row_ids.contains(&r.id) && window.contains(r.fields.start_at)));
        Ok(before - store.rows.len())
    }

    async fn rows_missing_from_collection(
        &self,
        account_id: &str,
        collection_id: &str,
        window: &SyncWindow,
    ) -> DomainResult<Vec<SyncedEvent>> {
        let store = self.store.lock().unwrap();
        let present: Vec<&str> = store
            .rows
            .iter()
            .filter(|r| r.collection_id == collection_id)
            .map(|r| r.external_id.as_str())
            .collect();
        Ok(store
            .rows
            .iter()
            .filter(|r| r.owner_id == account_id && r.collection_id != collection_id)
            .filter(|r| r.event_source_id.is_some() && window.contains(r.fields.start_at))
            .filter(|r| !present.contains(&r.external_id.as_str()))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct StateStore {
    states: HashMap<String, SyncState>,
    token_saves: Vec<(String, String)>,
    token_clears: usize,
}

#[derive(Default, Clone)]
pub struct InMemorySyncStates {
    store: Arc<Mutex<StateStore>>,
}

impl InMemorySyncStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, account_id: &str, token: &str) -> Self {
        self.entry(account_id, |s| s.sync_token = Some(token.to_string()));
        self
    }

    pub fn with_channel(self, account_id: &str, channel: WatchChannel) -> Self {
        self.entry(account_id, |s| s.channel = Some(channel));
        self
    }

    pub fn token_saves(&self) -> Vec<(String, String)> {
        self.store.lock().unwrap().token_saves.clone()
    }

    pub fn token_clears(&self) -> usize {
        self.store.lock().unwrap().token_clears
    }

    pub fn snapshot(&self, account_id: &str) -> SyncState {
        self.store.lock().unwrap().states.get(account_id).cloned().unwrap_or_default()
    }

    fn entry(&self, account_id: &str, f: impl FnOnce(&mut SyncState)) {
        let mut store = self.store.lock().unwrap();
        let state = store.states.entry(account_id.to_string()).or_insert_with(|| SyncState {
            account_id: account_id.to_string(),
            ..SyncState::default()
        });
        f(state);
    }
}

#[async_trait]
impl SyncStateRepository for InMemorySyncStates {
    async fn get(&self, account_id: &str) -> DomainResult<SyncState> {
        Ok(self.snapshot(account_id))
    }

    async fn save_token(&self, account_id: &str, token: &str) -> DomainResult<()> {
        self.entry(account_id, |s| s.sync_token = Some(token.to_string()));
        self.store.lock().unwrap().token_saves.push((account_id.to_string(), token.to_string()));
        Ok(())
    }

    async fn clear_token(&self, account_id: &str) -> DomainResult<()> {
        self.entry(account_id, |s| s.sync_token = None);
        self.store.lock().unwrap().token_clears += 1;
        Ok(())
    }

    async fn save_channel(&self, account_id: &str, channel: &WatchChannel) -> DomainResult<()> {
        self.entry(account_id, |s| s.channel = Some(channel.clone()));
        Ok(())
    }

    async fn clear_channel(&self, account_id: &str) -> DomainResult<()> {
        self.entry(account_id, |s| s.channel = None);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAccounts {
    accounts: Arc<Mutex<Vec<Account>>>,
}

impl InMemoryAccounts {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts: Arc::new(Mutex::new(accounts)) }
    }

    pub fn add(&self, account: Account) {
        self.accounts.lock().unwrap().push(account);
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccounts {
    async fn get(&self, account_id: &str) -> DomainResult<Option<Account>> {
        Ok(self.accounts.lock().unwrap().iter().find(|a| a.id == account_id).cloned())
    }

    async fn list_active(&self) -> DomainResult<Vec<Account>> {
        Ok(self.accounts.lock().unwrap().iter().filter(|a| a.active).cloned().collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryCollections {
    collections: Arc<Mutex<Vec<Collection>>>,
}

impl InMemoryCollections {
    pub fn new(collections: Vec<Collection>) -> Self {
        Self { collections: Arc::new(Mutex::new(collections)) }
    }
}

#[async_trait]
impl CollectionRepository for InMemoryCollections {
    async fn list_for_account(&self, account_id: &str) -> DomainResult<Vec<Collection>> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect())
    }
}

/// Collects jobs without running them, so tests control execution order.
#[derive(Default, Clone)]
pub struct RecordingJobQueue {
    jobs: Arc<Mutex<Vec<Job>>>,
}

impl RecordingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.lock().unwrap().iter().map(|j| j.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Remove and return queued jobs in enqueue order.
    pub fn drain(&self) -> Vec<Job> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }

    /// Run every queued job in order, failing on the first error.
    pub async fn run_all(&self) -> DomainResult<()> {
        for job in self.drain() {
            job.run().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn enqueue(&self, job: Job) -> DomainResult<()> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}
