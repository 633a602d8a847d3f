//! Cron scheduler for periodic delta sync and channel renewal.
//!
//! Each registered task runs on its own cron expression. Runs are wrapped in
//! a timeout, join handles are tracked, and cancellation is explicit.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use calsync_infra::scheduling::{SchedulerResult, SyncScheduler, SyncSchedulerConfig};
//!
//! # async fn example() -> SchedulerResult<()> {
//! # let accounts = todo!();
//! # let orchestrator = todo!();
//! # let channels = todo!();
//! let mut scheduler =
//!     SyncScheduler::for_sync(SyncSchedulerConfig::default(), accounts, orchestrator, channels);
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use calsync_core::{AccountRepository, ChannelManager, Job, SyncOrchestrator, SyncOutcome};
use calsync_domain::{CalsyncError, Result, SyncConfig};
use futures::FutureExt;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::scheduling::error::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// Six-field cron expression for the delta sync sweep.
    pub delta_cron: String,
    /// Six-field cron expression for the channel renewal sweep.
    pub renewal_cron: String,
    /// Timeout applied to a single task run.
    pub job_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl SyncSchedulerConfig {
    pub fn from_sync(sync: &SyncConfig) -> Self {
        Self {
            delta_cron: sync.delta_cron.clone(),
            renewal_cron: sync.renewal_cron.clone(),
            job_timeout: Duration::from_secs(sync.job_timeout_secs),
            ..Self::default()
        }
    }
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self {
            delta_cron: "0 */15 * * * *".into(),
            renewal_cron: "0 0 * * * *".into(),
            job_timeout: Duration::from_secs(600),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// A job bound to a cron expression.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub name: &'static str,
    pub cron: String,
    pub job: Job,
}

pub struct SyncScheduler {
    scheduler: Option<JobScheduler>,
    config: SyncSchedulerConfig,
    tasks: Vec<ScheduledTask>,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
}

impl SyncScheduler {
    pub fn new(config: SyncSchedulerConfig, tasks: Vec<ScheduledTask>) -> Self {
        Self {
            scheduler: None,
            config,
            tasks,
            monitor_handle: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Scheduler with the delta sync and channel renewal sweeps.
    pub fn for_sync(
        config: SyncSchedulerConfig,
        accounts: Arc<dyn AccountRepository>,
        orchestrator: Arc<SyncOrchestrator>,
        channels: Arc<ChannelManager>,
    ) -> Self {
        let delta = ScheduledTask {
            name: "delta-sync",
            cron: config.delta_cron.clone(),
            job: Job::new("delta-sync", move || {
                sync_active_accounts(accounts.clone(), orchestrator.clone()).boxed()
            }),
        };
        let renewal = ScheduledTask {
            name: "channel-renewal",
            cron: config.renewal_cron.clone(),
            job: Job::new("channel-renewal", move || {
                let channels = channels.clone();
                async move { channels.renew_expiring().await.map(|_| ()) }.boxed()
            }),
        };
        Self::new(config, vec![delta, renewal])
    }

    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let scheduler = self.build_scheduler().await?;
        let start_timeout = self.config.start_timeout;
        tokio::time::timeout(start_timeout, scheduler.start())
            .await
            .map_err(|_| SchedulerError::Timeout { duration: start_timeout })?
            .map_err(|source| SchedulerError::StartFailed { source })?;

        self.scheduler = Some(scheduler);

        let cancel = self.cancellation.clone();
        self.monitor_handle = Some(tokio::spawn(async move {
            cancel.cancelled().await;
            debug!("sync scheduler monitor cancelled");
        }));

        info!(tasks = self.tasks.len(), "sync scheduler started");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        let Some(mut scheduler) = self.scheduler.take() else {
            return Err(SchedulerError::NotRunning);
        };

        self.cancellation.cancel();

        let stop_timeout = self.config.stop_timeout;
        tokio::time::timeout(stop_timeout, scheduler.shutdown())
            .await
            .map_err(|_| SchedulerError::Timeout { duration: stop_timeout })?
            .map_err(|source| SchedulerError::StopFailed { source })?;

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { duration: join_timeout })??;
        }

        info!("sync scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    async fn build_scheduler(&self) -> SchedulerResult<JobScheduler> {
        let scheduler =
            JobScheduler::new().await.map_err(|source| SchedulerError::CreationFailed { source })?;

        for task in &self.tasks {
            let job = task.job.clone();
            let job_timeout = self.config.job_timeout;
            let name = task.name;

            let cron_job = CronJob::new_async(task.cron.as_str(), move |_id, _lock| {
                let job = job.clone();
                Box::pin(async move { run_task(name, &job, job_timeout).await })
            })
            .map_err(|source| SchedulerError::JobRegistrationFailed { job: name, source })?;

            let job_id = cron_job.guid();
            scheduler
                .add(cron_job)
                .await
                .map_err(|source| SchedulerError::JobRegistrationFailed { job: name, source })?;
            debug!(task = name, cron = %task.cron, job_id = %job_id, "registered scheduled task");
        }

        Ok(scheduler)
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.cancellation.cancel();
        if let Some(handle) = self.monitor_handle.take() {
            handle.abort();
        }
    }
}

async fn run_task(name: &'static str, job: &Job, job_timeout: Duration) {
    let started = Instant::now();
    match tokio::time::timeout(job_timeout, job.run()).await {
        Ok(Ok(())) => {
            debug!(task = name, elapsed_ms = started.elapsed().as_millis() as u64, "task finished");
        }
        Ok(Err(err)) => error!(task = name, error = %err, "scheduled task failed"),
        Err(_) => {
            warn!(task = name, timeout_secs = job_timeout.as_secs(), "scheduled task timed out");
        }
    }
}

/// Delta sweep over every active account. Account ids are redacted in logs.
async fn sync_active_accounts(
    accounts: Arc<dyn AccountRepository>,
    orchestrator: Arc<SyncOrchestrator>,
) -> Result<()> {
    let active = accounts.list_active().await?;
    if active.is_empty() {
        debug!("no active accounts to sync");
        return Ok(());
    }

    let mut dispatched = 0usize;
    let mut failures = 0usize;
    for account in &active {
        let tag = redact_account(&account.id);
        match orchestrator.sync_account(&account.id, None).await {
            Ok(SyncOutcome::Dispatched { events, collections, full }) => {
                dispatched += 1;
                debug!(account = %tag, events, collections, full, "account sync dispatched");
            }
            Ok(outcome) => debug!(account = %tag, ?outcome, "account sync skipped"),
            Err(err) => {
                failures += 1;
                warn!(account = %tag, error = %err, "account sync failed");
            }
        }
    }

    info!(accounts = active.len(), dispatched, failures, "delta sync sweep finished");
    if failures > 0 {
        return Err(CalsyncError::Internal(format!(
            "delta sync failed for {failures} of {} accounts",
            active.len()
        )));
    }
    Ok(())
}

fn redact_account(account_id: &str) -> String {
    const ACCOUNT_HASH_SALT: &[u8] = b"calsync-scheduler-account-salt";
    let mut hasher = Sha256::new();
    hasher.update(ACCOUNT_HASH_SALT);
    hasher.update(account_id.as_bytes());
    let digest = hasher.finalize();
    format!("account_hash={}", hex::encode(&digest[..8]))
}
