//! Push-notification channel lifecycle: create, renew and tear down.
//!
//! The renewal sweep only decides which accounts are due. Each due account
//! is renewed by its own job, so one account sleeping through the retry
//! schedule never delays another.

use std::sync::Arc;

use calsync_common::resilience::RetryConfig;
use calsync_domain::constants::WEBHOOK_PATH;
use calsync_domain::{Account, ProviderConfig, Result, WatchChannel, WatchRequest, WebhookConfig};
use chrono::{Duration, Utc};
use futures::FutureExt;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::ports::{AccountRepository, CalendarProvider, Job, JobQueue, SyncStateRepository};
use super::retry::{into_domain_error, retry_recoverable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub public_base_url: Option<String>,
    pub calendar_id: String,
    pub ttl_secs: i64,
    pub renew_before_secs: i64,
}

impl ChannelSettings {
    pub fn from_config(webhook: &WebhookConfig, provider: &ProviderConfig) -> Self {
        Self {
            public_base_url: webhook.public_base_url.clone(),
            calendar_id: provider.calendar_id.clone(),
            ttl_secs: webhook.channel_ttl_secs,
            renew_before_secs: webhook.renew_before_secs,
        }
    }

    /// `<base>/webhooks/calendar`, or `None` without a base URL.
    pub fn callback_url(&self) -> Option<String> {
        self.public_base_url
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .map(|base| format!("{}{WEBHOOK_PATH}", base.trim_end_matches('/')))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Created(WatchChannel),
    StillValid(WatchChannel),
    /// No public callback URL is configured.
    NotConfigured,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalSummary {
    /// Accounts handed to a renewal job.
    pub queued: usize,
    pub still_valid: usize,
    /// Accounts whose state could not be read or whose job was rejected.
    pub failed: usize,
}

/// Cheap to clone; renewal jobs hold a copy.
#[derive(Clone)]
pub struct ChannelManager {
    provider: Arc<dyn CalendarProvider>,
    accounts: Arc<dyn AccountRepository>,
    states: Arc<dyn SyncStateRepository>,
    jobs: Arc<dyn JobQueue>,
    settings: ChannelSettings,
    retry: RetryConfig,
}

impl ChannelManager {
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        accounts: Arc<dyn AccountRepository>,
        states: Arc<dyn SyncStateRepository>,
        jobs: Arc<dyn JobQueue>,
        settings: ChannelSettings,
        retry: RetryConfig,
    ) -> Self {
        Self { provider, accounts, states, jobs, settings, retry }
    }

    /// Make sure `account` has a live channel. A channel that stays valid
    /// past the renew-ahead margin is kept unless `force` is set.
    ///
    /// Creation is retried on the configured schedule. On exhaustion the
    /// account is left without a channel and the error is returned; the
    /// next renewal sweep tries again.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn ensure(&self, account: &Account, force: bool) -> Result<ChannelOutcome> {
        let Some(callback_url) = self.settings.callback_url() else {
            warn!("webhook base URL not configured, channel not created");
            return Ok(ChannelOutcome::NotConfigured);
        };

        let state = self.states.get(&account.id).await?;
        let margin = Duration::seconds(self.settings.renew_before_secs);
        if let Some(channel) = &state.channel {
            if !force && channel.is_valid_at(Utc::now(), margin) {
                return Ok(ChannelOutcome::StillValid(channel.clone()));
            }
        }

        if let Some(old) = state.channel {
            self.states.clear_channel(&account.id).await?;
            self.stop_quietly(account, &old).await;
        }

        let request = WatchRequest {
            channel_id: Uuid::now_v7().to_string(),
            callback_url,
            ttl_secs: self.settings.ttl_secs,
            resource: self.settings.calendar_id.clone(),
            token: account.id.clone(),
        };

        let channel = retry_recoverable(self.retry.clone())
            .execute(|| self.provider.create_watch_channel(account, &request))
            .await
            .map_err(into_domain_error)
            .inspect_err(|err| {
                error!(error = %err, "channel setup failed, account left without a channel");
            })?;

        self.states.save_channel(&account.id, &channel).await?;
        info!(
            channel_id = %channel.channel_id,
            expires_at = %channel.expires_at,
            "channel created"
        );
        Ok(ChannelOutcome::Created(channel))
    }

    /// Queue a renewal job for every active account whose channel is
    /// missing or expires within the renew-ahead margin. Returns once the
    /// jobs are queued; failures are counted, never raised.
    #[instrument(skip(self))]
    pub async fn renew_expiring(&self) -> Result<RenewalSummary> {
        let mut summary = RenewalSummary::default();
        if self.settings.callback_url().is_none() {
            warn!("webhook base URL not configured, channel renewal skipped");
            return Ok(summary);
        }

        let margin = Duration::seconds(self.settings.renew_before_secs);
        for account in self.accounts.list_active().await? {
            let state = match self.states.get(&account.id).await {
                Ok(state) => state,
                Err(err) => {
                    warn!(account_id = %account.id, error = %err, "reading channel state failed");
                    summary.failed += 1;
                    continue;
                }
            };
            if state.channel.is_some_and(|c| c.is_valid_at(Utc::now(), margin)) {
                summary.still_valid += 1;
                continue;
            }

            let account_id = account.id.clone();
            match self.jobs.enqueue(self.renewal_job(account)).await {
                Ok(()) => summary.queued += 1,
                Err(err) => {
                    warn!(account_id = %account_id, error = %err, "renewal job rejected");
                    summary.failed += 1;
                }
            }
        }

        info!(
            queued = summary.queued,
            still_valid = summary.still_valid,
            failed = summary.failed,
            "channel renewal sweep finished"
        );
        Ok(summary)
    }

    /// Runs `ensure` once. Creation retries happen inside `ensure`, so an
    /// exhausted account is logged and left for the next sweep.
    fn renewal_job(&self, account: Account) -> Job {
        let manager = self.clone();
        let name = format!("channel-renewal:{}", account.id);
        let account = Arc::new(account);
        Job::new(name, move || {
            let manager = manager.clone();
            let account = Arc::clone(&account);
            async move {
                if let Err(err) = manager.ensure(&account, false).await {
                    warn!(account_id = %account.id, error = %err, "channel renewal failed");
                }
                Ok(())
            }
            .boxed()
        })
    }

    /// Stop and forget the account's channel, if any.
    #[instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn teardown(&self, account: &Account) -> Result<bool> {
        let state = self.states.get(&account.id).await?;
        let Some(channel) = state.channel else {
            return Ok(false);
        };
        self.states.clear_channel(&account.id).await?;
        self.stop_quietly(account, &channel).await;
        info!(channel_id = %channel.channel_id, "channel torn down");
        Ok(true)
    }

    async fn stop_quietly(&self, account: &Account, channel: &WatchChannel) {
        if let Err(err) = self.provider.stop_watch_channel(account, channel).await {
            warn!(channel_id = %channel.channel_id, error = %err, "stopping old channel failed");
        }
    }
}
