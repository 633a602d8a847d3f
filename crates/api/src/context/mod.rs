//! Application context - dependency injection container

use std::sync::Arc;

use calsync_common::LeaseStore;
use calsync_core::calendar_sync::retry::{channel_retry_config, provider_retry_config};
use calsync_core::{
    AccountRepository, BatchSynchronizer, CalendarProvider, ChannelManager, ChannelSettings,
    ChunkDispatcher, ChunkProcessor, CollectionRepository, DeltaFetcher, JobQueue,
    OrphanReconciler, SyncOrchestrator, SyncStateRepository, SyncedEventRepository,
    WebhookHandler,
};
use calsync_domain::{Config, Result};
use calsync_infra::database::{
    DbManager, SqliteAccountRepository, SqliteCollectionRepository, SqliteSyncStateRepository,
    SqliteSyncedEventRepository,
};
use calsync_infra::integrations::GoogleCalendarProvider;
use calsync_infra::{JobQueueConfig, SyncScheduler, SyncSchedulerConfig, TokioJobQueue};
use tracing::{info, warn};

/// Upper bound on concurrently held fetch leases.
const LEASE_CAPACITY: u64 = 10_000;

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,

    // Ports
    pub provider: Arc<dyn CalendarProvider>,
    pub accounts: Arc<dyn AccountRepository>,
    pub collections: Arc<dyn CollectionRepository>,
    pub states: Arc<dyn SyncStateRepository>,
    pub events: Arc<dyn SyncedEventRepository>,

    // Services
    pub jobs: Arc<TokioJobQueue>,
    /// Channel renewal jobs, one per account, apart from the sync queue.
    pub channel_jobs: Arc<TokioJobQueue>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub channels: Arc<ChannelManager>,
    pub webhooks: Arc<WebhookHandler>,
}

impl AppContext {
    /// Open and migrate the database, then wire every repository and
    /// service against the configured provider.
    pub fn new(config: Config) -> Result<Self> {
        let db = Arc::new(DbManager::new(&config.database.path, config.database.pool_size)?);
        db.run_migrations()?;
        let pool = db.pool().clone();

        let provider: Arc<dyn CalendarProvider> =
            Arc::new(GoogleCalendarProvider::new(&config.provider)?);
        let accounts: Arc<dyn AccountRepository> =
            Arc::new(SqliteAccountRepository::new(pool.clone()));
        let collections: Arc<dyn CollectionRepository> =
            Arc::new(SqliteCollectionRepository::new(pool.clone()));
        let states: Arc<dyn SyncStateRepository> =
            Arc::new(SqliteSyncStateRepository::new(pool.clone()));
        let events: Arc<dyn SyncedEventRepository> =
            Arc::new(SqliteSyncedEventRepository::new(pool));

        let jobs = Arc::new(TokioJobQueue::new(JobQueueConfig::from_settings(
            config.sync.job_timeout_secs,
            &config.retry,
        )));
        let job_queue: Arc<dyn JobQueue> = jobs.clone();
        let provider_retry = provider_retry_config(&config.retry);

        let synchronizer =
            Arc::new(BatchSynchronizer::new(Arc::clone(&events), config.sync.clone()));
        let reconciler =
            Arc::new(OrphanReconciler::new(Arc::clone(&provider), Arc::clone(&events)));
        let fetcher = Arc::new(DeltaFetcher::new(
            Arc::clone(&provider),
            Arc::clone(&events),
            Arc::clone(&states),
            config.sync.bootstrap_months,
            provider_retry.clone(),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&accounts),
            Arc::clone(&collections),
            Arc::clone(&states),
            fetcher,
            Arc::clone(&synchronizer),
            Arc::clone(&reconciler),
            Arc::clone(&job_queue),
            LeaseStore::new(LEASE_CAPACITY),
        ));

        let processor = ChunkProcessor::new(
            Arc::clone(&provider),
            Arc::clone(&accounts),
            Arc::clone(&collections),
            synchronizer,
            reconciler,
            provider_retry,
        );
        let dispatcher = Arc::new(ChunkDispatcher::new(processor, job_queue));
        let webhooks = Arc::new(WebhookHandler::new(
            Arc::clone(&accounts),
            Arc::clone(&states),
            Arc::clone(&orchestrator),
            dispatcher,
        ));

        let channel_queue = JobQueueConfig::for_channels(config.sync.job_timeout_secs);
        let channel_jobs = Arc::new(TokioJobQueue::new(channel_queue));
        let channels = Arc::new(ChannelManager::new(
            Arc::clone(&provider),
            Arc::clone(&accounts),
            Arc::clone(&states),
            channel_jobs.clone(),
            ChannelSettings::from_config(&config.webhook, &config.provider),
            channel_retry_config(&config.retry),
        ));

        info!(database = %db.path().display(), "application context ready");
        Ok(Self {
            config,
            db,
            provider,
            accounts,
            collections,
            states,
            events,
            jobs,
            channel_jobs,
            orchestrator,
            channels,
            webhooks,
        })
    }

    /// Cron scheduler for the periodic delta sync and channel renewal.
    pub fn scheduler(&self) -> SyncScheduler {
        SyncScheduler::for_sync(
            SyncSchedulerConfig::from_sync(&self.config.sync),
            Arc::clone(&self.accounts),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.channels),
        )
    }

    /// Drain the sync job queue. Pending channel renewals are cancelled
    /// after a short grace period; the next start sweeps them again.
    pub async fn shutdown(&self) -> Result<()> {
        info!(
            pending = self.jobs.pending(),
            renewals = self.channel_jobs.pending(),
            "shutting down application context"
        );
        if let Err(err) = self.channel_jobs.shutdown().await {
            warn!(error = %err, "channel renewals cancelled");
        }
        self.jobs.shutdown().await
    }
}
