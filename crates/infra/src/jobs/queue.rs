//! Tokio-backed [`JobQueue`].
//!
//! Every job is spawned on a [`TaskTracker`] and gated by a semaphore so at
//! most `workers` run at once. Each run is wrapped in a timeout and retried
//! on transient failures; a job that still fails is logged and dropped so
//! one bad collection cannot stall the rest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use calsync_common::resilience::{BackoffStrategy, Jitter, RetryConfig};
use calsync_common::ErrorClassification;
use calsync_core::calendar_sync::retry::{into_domain_error, retry_transient};
use calsync_core::{Job, JobQueue};
use calsync_domain::{CalsyncError, Result, RetrySettings};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Upper bound on concurrently running jobs.
    pub workers: usize,
    /// Timeout for a single run of a job.
    pub job_timeout: Duration,
    pub retry: RetryConfig,
    /// Time granted to in-flight jobs on shutdown before they are cancelled.
    pub shutdown_timeout: Duration,
}

impl JobQueueConfig {
    pub fn from_settings(job_timeout_secs: u64, retry: &RetrySettings) -> Self {
        Self {
            job_timeout: Duration::from_secs(job_timeout_secs),
            retry: RetryConfig {
                max_attempts: retry.max_attempts.max(1),
                backoff: BackoffStrategy::Exponential {
                    initial_delay: Duration::from_millis(retry.initial_delay_ms),
                    base: 2.0,
                    max_delay: Duration::from_millis(retry.max_delay_ms),
                },
                jitter: Jitter::Equal,
                max_total_time: None,
            },
            ..Self::default()
        }
    }

    /// Channel renewals retry on their own schedule, so each job runs once.
    /// Jobs still sleeping between attempts are cancelled on shutdown.
    pub fn for_channels(job_timeout_secs: u64) -> Self {
        Self {
            job_timeout: Duration::from_secs(job_timeout_secs),
            retry: RetryConfig { max_attempts: 1, ..Self::default().retry },
            shutdown_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_timeout: Duration::from_secs(600),
            retry: RetryConfig {
                max_attempts: 3,
                backoff: BackoffStrategy::Exponential {
                    initial_delay: Duration::from_millis(500),
                    base: 2.0,
                    max_delay: Duration::from_secs(30),
                },
                jitter: Jitter::Equal,
                max_total_time: None,
            },
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TokioJobQueue {
    tracker: TaskTracker,
    permits: Arc<Semaphore>,
    cancellation: CancellationToken,
    config: JobQueueConfig,
}

impl TokioJobQueue {
    pub fn new(config: JobQueueConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        info!(workers = config.workers.max(1), "job queue ready");
        Self {
            tracker: TaskTracker::new(),
            permits,
            cancellation: CancellationToken::new(),
            config,
        }
    }

    /// Stop accepting jobs and wait for queued and running ones. Jobs still
    /// running after the shutdown timeout are cancelled.
    pub async fn shutdown(&self) -> Result<()> {
        self.tracker.close();
        let pending = self.tracker.len();
        let timeout = self.config.shutdown_timeout;

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            info!(pending, "job queue drained");
            return Ok(());
        }

        self.cancellation.cancel();
        warn!(remaining = self.tracker.len(), "job queue drain timed out, cancelling");
        Err(CalsyncError::Timeout(format!(
            "job queue did not drain within {}s",
            timeout.as_secs()
        )))
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}

impl Drop for TokioJobQueue {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        if self.tracker.is_closed() {
            return Err(CalsyncError::Internal(format!(
                "job queue is shut down, {} rejected",
                job.name()
            )));
        }

        let permits = self.permits.clone();
        let cancel = self.cancellation.clone();
        let config = self.config.clone();
        debug!(job = %job.name(), "job enqueued");

        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(job = %job.name(), "job cancelled during shutdown");
                }
                _ = async {
                    // the semaphore is never closed
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    run_job(&job, &config).await;
                } => {}
            }
        });
        Ok(())
    }
}

async fn run_job(job: &Job, config: &JobQueueConfig) {
    let started = Instant::now();
    let job_timeout = config.job_timeout;

    let result = retry_transient(config.retry.clone())
        .execute(|| async {
            match tokio::time::timeout(job_timeout, job.run()).await {
                Ok(result) => result,
                Err(_) => Err(CalsyncError::Timeout(format!(
                    "{} exceeded {}s",
                    job.name(),
                    job_timeout.as_secs()
                ))),
            }
        })
        .await
        .map_err(into_domain_error);

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(()) => debug!(job = %job.name(), elapsed_ms, "job finished"),
        Err(err) => error!(
            job = %job.name(),
            elapsed_ms,
            severity = %err.severity(),
            error = %err,
            "job failed"
        ),
    }
}
