//! Delta fetcher: picks the sync mode and performs one provider listing.
//!
//! Never writes sync state. Persisting the next token is the caller's job,
//! which keeps "one fetch consumes one token" in a single place.

use std::sync::Arc;

use calsync_common::resilience::RetryConfig;
use calsync_domain::{Account, ChangeSet, Result, SyncMode, SyncWindow};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::ports::{CalendarProvider, SyncStateRepository, SyncedEventRepository};
use super::retry::{into_domain_error, retry_transient};

pub struct DeltaFetcher {
    provider: Arc<dyn CalendarProvider>,
    events: Arc<dyn SyncedEventRepository>,
    states: Arc<dyn SyncStateRepository>,
    bootstrap_months: u32,
    retry: RetryConfig,
}

impl DeltaFetcher {
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        events: Arc<dyn SyncedEventRepository>,
        states: Arc<dyn SyncStateRepository>,
        bootstrap_months: u32,
        retry: RetryConfig,
    ) -> Self {
        Self { provider, events, states, bootstrap_months, retry }
    }

    /// Incremental when the account already has synced rows and a stored
    /// token; otherwise a full fetch over the bootstrap window.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn determine_mode(&self, account: &Account, now: DateTime<Utc>) -> Result<SyncMode> {
        let has_events = self.events.has_events_for_account(&account.id).await?;
        let state = self.states.get(&account.id).await?;

        let mode = match (has_events, state.sync_token) {
            (true, Some(token)) => SyncMode::Incremental { token },
            _ => self.full_mode(now),
        };
        debug!(full = mode.is_full(), "sync mode selected");
        Ok(mode)
    }

    pub fn full_mode(&self, now: DateTime<Utc>) -> SyncMode {
        SyncMode::Full { window: SyncWindow::bootstrap(now, self.bootstrap_months) }
    }

    /// One logical listing; transient failures are retried with backoff.
    /// A stale token surfaces as `CalsyncError::TokenInvalid`.
    pub async fn fetch(&self, account: &Account, mode: &SyncMode) -> Result<ChangeSet> {
        retry_transient(self.retry.clone())
            .execute(|| self.provider.list_events(account, mode))
            .await
            .map_err(into_domain_error)
    }
}
