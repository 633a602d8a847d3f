//! Batch synchronizer: applies a change set to one or more collections
//! through a single staged unit of work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use calsync_domain::{
    extract_base_id, occurrence_key, Account, ApplyReport, Collection, CommitReport, DeleteScope,
    Deletion, EventFields, EventStatus, ExternalEvent, IdShape, NewSyncedEvent, Result, RowUpdate,
    SyncConfig, SyncWindow, WritePlan,
};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use super::dispatch::{change_kind, ChangeKind};
use super::index::ExistingIndex;
use super::normalizer::{normalize, source_upsert};
use super::ports::SyncedEventRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMatchDecision {
    Create,
    Skip,
}

/// Decides what happens to an active event with no existing row.
pub trait NoMatchPolicy: Send + Sync {
    fn decide(
        &self,
        collection: &Collection,
        fields: &EventFields,
        window: &SyncWindow,
    ) -> NoMatchDecision;
}

/// Creates rows only for events starting inside the active window, so a
/// series never materializes every future instance at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowedCreate;

impl NoMatchPolicy for WindowedCreate {
    fn decide(
        &self,
        _collection: &Collection,
        fields: &EventFields,
        window: &SyncWindow,
    ) -> NoMatchDecision {
        if window.contains(fields.start_at) {
            NoMatchDecision::Create
        } else {
            NoMatchDecision::Skip
        }
    }
}

/// Drop occurrence items outside `window` (when given) and keep only the
/// first item per (base id, date).
pub fn filter_and_dedupe(
    events: Vec<ExternalEvent>,
    window: Option<&SyncWindow>,
) -> Vec<ExternalEvent> {
    let mut seen: HashSet<(String, NaiveDate)> = HashSet::new();
    events
        .into_iter()
        .filter(|event| match occurrence_key(&event.id) {
            Some((base_id, date)) => {
                if window.is_some_and(|w| !w.contains_date(date)) {
                    debug!(external_id = %event.id, %date, "occurrence outside window, dropped");
                    return false;
                }
                seen.insert((base_id, date))
            }
            None => true,
        })
        .collect()
}

/// Staged reads and writes for one unit of work.
///
/// Existing rows are fetched once on open; every staged change also updates
/// the in-memory index so later items in the same batch see it. Nothing is
/// written until [`flush`](Self::flush).
#[derive(Debug)]
pub struct StagingSession {
    owner_id: String,
    collections: Vec<Collection>,
    index: ExistingIndex,
    plan: WritePlan,
    staged_inserts: HashMap<(String, String), usize>,
    staged_updates: HashMap<String, usize>,
    report: ApplyReport,
    synced_at: DateTime<Utc>,
}

impl StagingSession {
    /// Pre-fetch every row that could match `external_ids` or their base ids.
    pub async fn open(
        repository: &dyn SyncedEventRepository,
        owner_id: &str,
        collections: &[Collection],
        external_ids: &[String],
    ) -> Result<Self> {
        let collection_ids: Vec<String> = collections.iter().map(|c| c.id.clone()).collect();
        let mut base_ids: Vec<String> =
            external_ids.iter().map(|id| extract_base_id(id).to_string()).collect();
        base_ids.sort();
        base_ids.dedup();

        let rows = if external_ids.is_empty() {
            Vec::new()
        } else {
            repository.find_matching(&collection_ids, external_ids, &base_ids).await?
        };
        debug!(rows = rows.len(), ids = external_ids.len(), "pre-fetched existing rows");

        Ok(Self {
            owner_id: owner_id.to_string(),
            collections: collections.to_vec(),
            index: ExistingIndex::build(rows),
            plan: WritePlan::default(),
            staged_inserts: HashMap::new(),
            staged_updates: HashMap::new(),
            report: ApplyReport::default(),
            synced_at: Utc::now(),
        })
    }

    /// Stage deletion of a cancelled id in every collection. Base ids take
    /// the whole series with them; occurrence ids only their own row.
    pub fn stage_cancellation(&mut self, external_id: &str) {
        let kind = change_kind(EventStatus::Cancelled, &IdShape::classify(external_id));
        let scope =
            if kind == ChangeKind::CancelSeries { DeleteScope::Series } else { DeleteScope::Exact };

        for collection in &self.collections {
            match scope {
                DeleteScope::Series => {
                    self.index.remove_series(&collection.id, external_id);
                }
                DeleteScope::Exact => {
                    self.index.remove(&collection.id, external_id);
                }
            }
            self.plan.deletions.push(Deletion {
                collection_id: collection.id.clone(),
                external_id: external_id.to_string(),
                scope,
            });
        }
        self.drop_staged_inserts(external_id, scope);
    }

    /// Stage create-or-update of an active event in every collection.
    pub fn stage_active(
        &mut self,
        event: &ExternalEvent,
        fields: &EventFields,
        window: &SyncWindow,
        policy: &dyn NoMatchPolicy,
    ) {
        self.plan.sources.push(source_upsert(&self.owner_id, event, self.synced_at));

        let shape = IdShape::classify(&event.id);
        let kind = change_kind(event.status, &shape);

        for collection in self.collections.clone() {
            if let Some(row) = self.index.exact(&collection.id, &event.id) {
                let row_id = row.id.clone();
                self.stage_update(row_id, &event.id, fields);
                continue;
            }

            if let (ChangeKind::UpsertOccurrence, IdShape::Occurrence { base_id, date }) =
                (kind, &shape)
            {
                if let Some(row) = self.index.promotable(&collection.id, base_id, *date) {
                    let row_id = row.id.clone();
                    debug!(
                        collection_id = %collection.id,
                        from = %base_id,
                        to = %event.id,
                        "rewriting single event id to occurrence id"
                    );
                    self.stage_update(row_id, &event.id, fields);
                    self.index.rekey(&collection.id, base_id, &event.id);
                    continue;
                }
            }

            let key = (collection.id.clone(), event.id.clone());
            if let Some(&slot) = self.staged_inserts.get(&key) {
                self.plan.inserts[slot].fields = fields.clone();
                continue;
            }

            match policy.decide(&collection, fields, window) {
                NoMatchDecision::Create => {
                    self.staged_inserts.insert(key, self.plan.inserts.len());
                    self.plan.inserts.push(NewSyncedEvent {
                        collection_id: collection.id.clone(),
                        owner_id: self.owner_id.clone(),
                        external_id: event.id.clone(),
                        fields: fields.clone(),
                    });
                }
                NoMatchDecision::Skip => {
                    debug!(
                        collection_id = %collection.id,
                        external_id = %event.id,
                        "no existing row and policy declined creation"
                    );
                    self.report.skipped += 1;
                }
            }
        }
    }

    pub fn note_skipped(&mut self) {
        self.report.skipped += 1;
    }

    pub fn note_error(&mut self) {
        self.report.errors += 1;
    }

    /// Staged row writes not yet flushed.
    pub fn pending(&self) -> usize {
        self.plan.deletions.len() + self.plan.updates.len() + self.plan.inserts.len()
    }

    /// Commit everything staged so far in one transaction.
    pub async fn flush(
        &mut self,
        repository: &dyn SyncedEventRepository,
    ) -> Result<CommitReport> {
        if self.plan.is_empty() && self.plan.sources.is_empty() {
            return Ok(CommitReport::default());
        }
        let plan = std::mem::take(&mut self.plan);
        self.staged_inserts.clear();
        self.staged_updates.clear();

        let commit = repository.commit(plan).await?;
        for failure in &commit.failures {
            warn!(external_id = %failure.external_id, error = %failure.message, "row write failed");
        }
        self.report.record_commit(&commit);
        Ok(commit)
    }

    pub fn finish(self) -> ApplyReport {
        self.report
    }

    fn stage_update(&mut self, row_id: String, external_id: &str, fields: &EventFields) {
        let update = RowUpdate {
            row_id: row_id.clone(),
            external_id: external_id.to_string(),
            fields: fields.clone(),
        };
        match self.staged_updates.get(&row_id) {
            Some(&slot) => self.plan.updates[slot] = update,
            None => {
                self.staged_updates.insert(row_id, self.plan.updates.len());
                self.plan.updates.push(update);
            }
        }
    }

    fn drop_staged_inserts(&mut self, external_id: &str, scope: DeleteScope) {
        let before = self.plan.inserts.len();
        self.plan.inserts.retain(|insert| match scope {
            DeleteScope::Exact => insert.external_id != external_id,
            DeleteScope::Series => {
                insert.external_id != external_id
                    && extract_base_id(&insert.external_id) != external_id
            }
        });
        if self.plan.inserts.len() != before {
            self.staged_inserts = self
                .plan
                .inserts
                .iter()
                .enumerate()
                .map(|(slot, i)| ((i.collection_id.clone(), i.external_id.clone()), slot))
                .collect();
        }
    }
}

/// Applies change sets to collections.
pub struct BatchSynchronizer {
    events: Arc<dyn SyncedEventRepository>,
    policy: Arc<dyn NoMatchPolicy>,
    config: SyncConfig,
}

impl BatchSynchronizer {
    pub fn new(events: Arc<dyn SyncedEventRepository>, config: SyncConfig) -> Self {
        Self { events, policy: Arc::new(WindowedCreate), config }
    }

    /// Replace the no-match policy.
    pub fn with_policy(mut self, policy: Arc<dyn NoMatchPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn SyncedEventRepository> {
        &self.events
    }

    pub fn policy(&self) -> &dyn NoMatchPolicy {
        self.policy.as_ref()
    }

    pub fn active_window(&self, now: DateTime<Utc>) -> SyncWindow {
        SyncWindow::active(now, self.config.weeks_past, self.config.weeks_future)
    }

    /// Apply `events` to every collection in one transaction. Cancellations
    /// are staged before active events.
    #[instrument(skip(self, account, collections, events), fields(
        account_id = %account.id,
        collections = collections.len(),
        events = events.len()
    ))]
    pub async fn apply(
        &self,
        account: &Account,
        collections: &[Collection],
        events: &[ExternalEvent],
    ) -> Result<ApplyReport> {
        if collections.is_empty() || events.is_empty() {
            return Ok(ApplyReport::default());
        }

        let window = self.active_window(Utc::now());
        let events = filter_and_dedupe(events.to_vec(), None);
        let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        let mut session =
            StagingSession::open(self.events.as_ref(), &account.id, collections, &ids).await?;

        let (cancelled, active): (Vec<&ExternalEvent>, Vec<&ExternalEvent>) =
            events.iter().partition(|e| e.status.is_cancelled());

        for event in cancelled {
            session.stage_cancellation(&event.id);
        }
        for event in active {
            match normalize(event) {
                Some(fields) => session.stage_active(event, &fields, &window, self.policy.as_ref()),
                None => session.note_skipped(),
            }
        }

        session.flush(self.events.as_ref()).await?;
        let report = session.finish();
        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            errors = report.errors,
            "change set applied"
        );
        Ok(report)
    }

    /// Copy into `collection` the rows that other collections of the same
    /// account hold through an event source but `collection` lacks.
    /// Returns the number of rows inserted.
    #[instrument(skip(self, account, collection, window), fields(
        account_id = %account.id,
        collection_id = %collection.id
    ))]
    pub async fn backfill_collection(
        &self,
        account: &Account,
        collection: &Collection,
        window: &SyncWindow,
    ) -> Result<usize> {
        let rows =
            self.events.rows_missing_from_collection(&account.id, &collection.id, window).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut seen = HashSet::new();
        let inserts: Vec<NewSyncedEvent> = rows
            .into_iter()
            .filter(|row| seen.insert(row.external_id.clone()))
            .map(|row| NewSyncedEvent {
                collection_id: collection.id.clone(),
                owner_id: account.id.clone(),
                external_id: row.external_id,
                fields: row.fields,
            })
            .collect();

        let commit = self.events.commit(WritePlan { inserts, ..WritePlan::default() }).await?;
        info!(
            inserted = commit.inserted,
            failures = commit.failures.len(),
            "collection backfilled"
        );
        Ok(commit.inserted)
    }
}
