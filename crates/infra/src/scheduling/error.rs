//! Scheduler error types

use std::time::Duration;

use calsync_domain::CalsyncError;
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

use crate::errors::InfraError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Scheduler not running")]
    NotRunning,

    #[error("Failed to create scheduler: {source}")]
    CreationFailed { source: JobSchedulerError },

    #[error("Failed to start scheduler: {source}")]
    StartFailed { source: JobSchedulerError },

    #[error("Failed to stop scheduler: {source}")]
    StopFailed { source: JobSchedulerError },

    /// Usually an invalid cron expression.
    #[error("Failed to register job {job}: {source}")]
    JobRegistrationFailed { job: &'static str, source: JobSchedulerError },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Task join failed: {0}")]
    TaskJoinFailed(#[from] tokio::task::JoinError),
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let domain = match err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                CalsyncError::InvalidInput(err.to_string())
            }
            SchedulerError::JobRegistrationFailed { .. } => CalsyncError::Config(err.to_string()),
            SchedulerError::Timeout { .. } => CalsyncError::Timeout(err.to_string()),
            _ => CalsyncError::Internal(err.to_string()),
        };
        InfraError(domain)
    }
}

impl From<SchedulerError> for CalsyncError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
