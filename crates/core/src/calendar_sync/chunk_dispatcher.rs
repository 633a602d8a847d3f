//! Chunk dispatcher for webhook-driven change lists.
//!
//! Items are filtered to the active window, deduplicated per (series, day),
//! and split into fixed-size chunks. Chunks after the first are queued as
//! background jobs before the first is applied inline, and a failed inline
//! chunk is queued as well. The sync token has already advanced by the time
//! items arrive here, so every chunk must end up applied or queued. Only the
//! last chunk reconciles.

use std::sync::Arc;

use calsync_common::resilience::RetryConfig;
use calsync_domain::{Account, ApplyReport, Collection, ExternalEvent, Result, SyncWindow};
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use super::normalizer::normalize;
use super::ports::{AccountRepository, CalendarProvider, CollectionRepository, Job, JobQueue};
use super::reconciler::OrphanReconciler;
use super::retry::{into_domain_error, retry_transient};
use super::synchronizer::{filter_and_dedupe, BatchSynchronizer, StagingSession};

/// One slice of a webhook delivery. `index` is 1-based.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub account_id: String,
    pub index: usize,
    pub total: usize,
    pub items: Vec<ExternalEvent>,
    pub window: SyncWindow,
}

impl Chunk {
    pub fn is_last(&self) -> bool {
        self.index == self.total
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub received: usize,
    pub kept: usize,
    pub chunks: usize,
    /// Outcome of the chunk applied inline.
    pub first_chunk: ApplyReport,
    /// The inline chunk failed and was queued for a retry in the background.
    pub first_chunk_deferred: bool,
}

/// Applies a single chunk. Cheap to clone; background jobs hold a copy.
#[derive(Clone)]
pub struct ChunkProcessor {
    provider: Arc<dyn CalendarProvider>,
    accounts: Arc<dyn AccountRepository>,
    collections: Arc<dyn CollectionRepository>,
    synchronizer: Arc<BatchSynchronizer>,
    reconciler: Arc<OrphanReconciler>,
    retry: RetryConfig,
}

impl ChunkProcessor {
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        accounts: Arc<dyn AccountRepository>,
        collections: Arc<dyn CollectionRepository>,
        synchronizer: Arc<BatchSynchronizer>,
        reconciler: Arc<OrphanReconciler>,
        retry: RetryConfig,
    ) -> Self {
        Self { provider, accounts, collections, synchronizer, reconciler, retry }
    }

    #[instrument(skip(self, chunk), fields(
        account_id = %chunk.account_id,
        chunk_index = chunk.index,
        total_chunks = chunk.total,
        items = chunk.items.len()
    ))]
    pub async fn process(&self, chunk: &Chunk) -> Result<ApplyReport> {
        let Some(account) = self.accounts.get(&chunk.account_id).await? else {
            warn!("account not found, dropping chunk");
            return Ok(ApplyReport::default());
        };
        let collections = self.collections.list_for_account(&account.id).await?;
        if collections.is_empty() {
            debug!("account has no collections");
            return Ok(ApplyReport::default());
        }

        let repository = self.synchronizer.repository().as_ref();
        let flush_every = self.synchronizer.config().flush_every.max(1);
        let ids: Vec<String> = chunk.items.iter().map(|i| i.id.clone()).collect();
        let mut session = StagingSession::open(repository, &account.id, &collections, &ids).await?;

        for (position, item) in chunk.items.iter().enumerate() {
            self.stage_item(&account, item, &chunk.window, &mut session).await;

            if (position + 1) % flush_every == 0 && session.pending() > 0 {
                session.flush(repository).await?;
                debug!(processed = position + 1, "flushed mid-chunk");
            }
        }
        session.flush(repository).await?;
        let mut report = session.finish();

        if chunk.is_last() {
            report.deleted += self.reconcile(&account, &collections, &chunk.window).await;
        }

        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            errors = report.errors,
            "chunk processed"
        );
        Ok(report)
    }

    /// Cancelled items are deleted directly. Everything else is re-fetched
    /// in full first; a missing event counts as a cancellation.
    async fn stage_item(
        &self,
        account: &Account,
        item: &ExternalEvent,
        window: &SyncWindow,
        session: &mut StagingSession,
    ) {
        if item.status.is_cancelled() {
            session.stage_cancellation(&item.id);
            return;
        }

        let fetched = retry_transient(self.retry.clone())
            .execute(|| self.provider.get_event_by_id(account, &item.id))
            .await
            .map_err(into_domain_error);

        match fetched {
            Ok(None) => {
                debug!(external_id = %item.id, "event gone on re-fetch, treating as cancelled");
                session.stage_cancellation(&item.id);
            }
            Ok(Some(event)) if event.status.is_cancelled() => {
                session.stage_cancellation(&event.id);
            }
            Ok(Some(event)) => match normalize(&event) {
                Some(fields) => session.stage_active(
                    &event,
                    &fields,
                    window,
                    self.synchronizer.policy(),
                ),
                None => session.note_skipped(),
            },
            Err(err) => {
                warn!(external_id = %item.id, error = %err, "re-fetch failed, item skipped");
                session.note_error();
            }
        }
    }

    async fn reconcile(
        &self,
        account: &Account,
        collections: &[Collection],
        window: &SyncWindow,
    ) -> usize {
        match self.reconciler.reconcile(account, collections, window).await {
            Ok(deleted) => deleted,
            Err(err) => {
                warn!(error = %err, "reconciliation after last chunk failed");
                0
            }
        }
    }
}

pub struct ChunkDispatcher {
    processor: ChunkProcessor,
    jobs: Arc<dyn JobQueue>,
}

impl ChunkDispatcher {
    pub fn new(processor: ChunkProcessor, jobs: Arc<dyn JobQueue>) -> Self {
        Self { processor, jobs }
    }

    /// Split `items` into chunks, enqueue all but the first, then apply the
    /// first inline. Errors only when a chunk cannot be queued.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn dispatch(
        &self,
        account_id: &str,
        items: Vec<ExternalEvent>,
    ) -> Result<DispatchSummary> {
        let received = items.len();
        let window = self.processor.synchronizer.active_window(Utc::now());
        let kept = filter_and_dedupe(items, Some(&window));
        let chunk_size = self.processor.synchronizer.config().chunk_size.max(1);

        let slices: Vec<Vec<ExternalEvent>> = kept.chunks(chunk_size).map(<[_]>::to_vec).collect();
        let total = slices.len();
        let mut summary =
            DispatchSummary { received, kept: kept.len(), chunks: total, ..Default::default() };

        let mut chunks = slices.into_iter().enumerate().map(|(i, items)| Chunk {
            account_id: account_id.to_string(),
            index: i + 1,
            total,
            items,
            window,
        });
        let Some(first) = chunks.next() else {
            debug!("nothing left after filtering");
            return Ok(summary);
        };

        for chunk in chunks {
            self.enqueue(chunk).await?;
        }

        match self.processor.process(&first).await {
            Ok(report) => summary.first_chunk = report,
            Err(err) => {
                warn!(error = %err, "inline chunk failed, queueing it for retry");
                self.enqueue(first).await?;
                summary.first_chunk_deferred = true;
            }
        }

        info!(received, kept = summary.kept, chunks = total, "webhook items dispatched");
        Ok(summary)
    }

    async fn enqueue(&self, chunk: Chunk) -> Result<()> {
        let processor = self.processor.clone();
        let name = format!("webhook-chunk:{}:{}/{}", chunk.account_id, chunk.index, chunk.total);
        let chunk = Arc::new(chunk);
        self.jobs
            .enqueue(Job::new(name, move || {
                let processor = processor.clone();
                let chunk = Arc::clone(&chunk);
                async move { processor.process(&chunk).await.map(|_| ()) }.boxed()
            }))
            .await
    }
}
