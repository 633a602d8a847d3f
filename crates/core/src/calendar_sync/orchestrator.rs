//! Sync orchestrator: one token-consuming fetch per account, then one job
//! per target collection over the same change set.

use std::sync::Arc;
use std::time::Duration;

use calsync_common::cache::{LeaseGuard, LeaseStore};
use calsync_domain::constants::TOKEN_FETCH_LEASE_SECS;
use calsync_domain::{
    Account, ApplyReport, CalsyncError, ChangeSet, Collection, ExternalEvent, Result, SyncMode,
    SyncWindow,
};
use chrono::Utc;
use futures::FutureExt;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::delta::DeltaFetcher;
use super::ports::{AccountRepository, CollectionRepository, Job, JobQueue, SyncStateRepository};
use super::reconciler::OrphanReconciler;
use super::synchronizer::BatchSynchronizer;

/// Result of one sync trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Dispatched { events: usize, collections: usize, full: bool },
    /// Another trigger holds the fetch lease for this account.
    AlreadyInProgress,
    Skipped { reason: &'static str },
}

pub fn fetch_lease_key(account_id: &str) -> String {
    format!("token-fetch:{account_id}")
}

pub struct SyncOrchestrator {
    accounts: Arc<dyn AccountRepository>,
    collections: Arc<dyn CollectionRepository>,
    states: Arc<dyn SyncStateRepository>,
    fetcher: Arc<DeltaFetcher>,
    synchronizer: Arc<BatchSynchronizer>,
    reconciler: Arc<OrphanReconciler>,
    jobs: Arc<dyn JobQueue>,
    leases: LeaseStore,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        collections: Arc<dyn CollectionRepository>,
        states: Arc<dyn SyncStateRepository>,
        fetcher: Arc<DeltaFetcher>,
        synchronizer: Arc<BatchSynchronizer>,
        reconciler: Arc<OrphanReconciler>,
        jobs: Arc<dyn JobQueue>,
        leases: LeaseStore,
    ) -> Self {
        Self { accounts, collections, states, fetcher, synchronizer, reconciler, jobs, leases }
    }

    /// Sync one account. With `targets`, only those collections receive the
    /// change set, and each is backfilled from the account's other
    /// collections.
    #[instrument(skip(self, targets), fields(targeted = targets.is_some()))]
    pub async fn sync_account(
        &self,
        account_id: &str,
        targets: Option<&[String]>,
    ) -> Result<SyncOutcome> {
        let account = self
            .accounts
            .get(account_id)
            .await?
            .ok_or_else(|| CalsyncError::NotFound(format!("account {account_id}")))?;
        if !account.active {
            return Ok(SyncOutcome::Skipped { reason: "account inactive" });
        }

        let mut collections = self.collections.list_for_account(account_id).await?;
        if let Some(targets) = targets {
            collections.retain(|c| targets.contains(&c.id));
        }
        if collections.is_empty() {
            return Ok(SyncOutcome::Skipped { reason: "no collections" });
        }

        let Some(lease) = self.acquire_fetch_lease(account_id) else {
            info!("token fetch already in progress, skipping");
            return Ok(SyncOutcome::AlreadyInProgress);
        };
        let change_set = self.fetch_and_advance(&account).await?;
        drop(lease);

        let full = change_set.mode.is_full();
        let reconcile_window = match &change_set.mode {
            SyncMode::Full { window } => *window,
            SyncMode::Incremental { .. } => SyncWindow::month_of(Utc::now()),
        };
        let events = Arc::new(change_set.events);

        for collection in &collections {
            let task = Arc::new(CollectionSyncTask {
                synchronizer: Arc::clone(&self.synchronizer),
                reconciler: Arc::clone(&self.reconciler),
                account: account.clone(),
                collection: collection.clone(),
                events: Arc::clone(&events),
                reconcile_window,
                backfill: targets.is_some(),
            });
            self.jobs
                .enqueue(Job::new(format!("collection-sync:{}", collection.id), move || {
                    let task = Arc::clone(&task);
                    async move { task.run().await.map(|_| ()) }.boxed()
                }))
                .await?;
        }

        info!(
            events = events.len(),
            collections = collections.len(),
            full,
            "collection jobs dispatched"
        );
        Ok(SyncOutcome::Dispatched { events: events.len(), collections: collections.len(), full })
    }

    /// Sync every active account; failures are logged per account.
    pub async fn sync_all(&self) -> Result<usize> {
        let accounts = self.accounts.list_active().await?;
        let mut dispatched = 0;
        for account in &accounts {
            match self.sync_account(&account.id, None).await {
                Ok(SyncOutcome::Dispatched { .. }) => dispatched += 1,
                Ok(_) => {}
                Err(err) => error!(account_id = %account.id, error = %err, "account sync failed"),
            }
        }
        Ok(dispatched)
    }

    /// Claim the per-account token-fetch lease. Released when the guard
    /// drops or the TTL lapses.
    pub fn acquire_fetch_lease(&self, account_id: &str) -> Option<LeaseGuard> {
        self.leases.acquire_guard(
            &fetch_lease_key(account_id),
            &Uuid::now_v7().to_string(),
            Duration::from_secs(TOKEN_FETCH_LEASE_SECS),
        )
    }

    /// Fetch once and persist the next token once. A rejected token is
    /// cleared and the fetch repeated a single time in full mode.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn fetch_and_advance(&self, account: &Account) -> Result<ChangeSet> {
        let now = Utc::now();
        let mode = self.fetcher.determine_mode(account, now).await?;

        let change_set = match self.fetcher.fetch(account, &mode).await {
            Ok(change_set) => change_set,
            Err(err) if err.is_token_invalid() && !mode.is_full() => {
                warn!(error = %err, "sync token rejected, falling back to full sync");
                self.states.clear_token(&account.id).await?;
                self.fetcher.fetch(account, &self.fetcher.full_mode(now)).await?
            }
            Err(err) => return Err(err),
        };

        match &change_set.next_sync_token {
            Some(token) => self.states.save_token(&account.id, token).await?,
            None => warn!("provider returned no next sync token"),
        }
        info!(
            events = change_set.events.len(),
            full = change_set.mode.is_full(),
            "change set fetched"
        );
        Ok(change_set)
    }
}

/// Per-collection work fanned out from one fetch: apply, reconcile, and
/// optionally backfill.
struct CollectionSyncTask {
    synchronizer: Arc<BatchSynchronizer>,
    reconciler: Arc<OrphanReconciler>,
    account: Account,
    collection: Collection,
    events: Arc<Vec<ExternalEvent>>,
    reconcile_window: SyncWindow,
    backfill: bool,
}

impl CollectionSyncTask {
    #[instrument(skip(self), fields(
        account_id = %self.account.id,
        collection_id = %self.collection.id
    ))]
    async fn run(&self) -> Result<ApplyReport> {
        let targets = std::slice::from_ref(&self.collection);
        let mut report = self.synchronizer.apply(&self.account, targets, &self.events).await?;

        match self.reconciler.reconcile(&self.account, targets, &self.reconcile_window).await {
            Ok(deleted) => report.deleted += deleted,
            Err(err) => {
                warn!(error = %err, "reconciliation failed");
                report.errors += 1;
            }
        }

        if self.backfill {
            let window =
                SyncWindow::bootstrap(Utc::now(), self.synchronizer.config().bootstrap_months);
            report.created += self
                .synchronizer
                .backfill_collection(&self.account, &self.collection, &window)
                .await?;
        }

        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            errors = report.errors,
            "collection sync finished"
        );
        Ok(report)
    }
}
