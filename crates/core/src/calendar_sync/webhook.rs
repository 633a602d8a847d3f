//! Push notification handling.

use std::str::FromStr;
use std::sync::Arc;

use calsync_domain::{CalsyncError, Result};
use tracing::{debug, info, instrument, warn};

use super::chunk_dispatcher::{ChunkDispatcher, DispatchSummary};
use super::orchestrator::SyncOrchestrator;
use super::ports::{AccountRepository, SyncStateRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Handshake sent right after channel creation.
    Sync,
    Exists,
    NotExists,
}

impl FromStr for ResourceState {
    type Err = CalsyncError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "exists" => Ok(Self::Exists),
            "not_exists" => Ok(Self::NotExists),
            other => Err(CalsyncError::InvalidInput(format!("unknown resource state: {other}"))),
        }
    }
}

/// Provider notification as carried in the callback headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub channel_id: String,
    /// Account id the channel was registered with.
    pub channel_token: Option<String>,
    pub resource_id: Option<String>,
    pub resource_state: ResourceState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Acknowledged,
    /// Channel id does not match the account's current channel.
    StaleChannel,
    UnknownAccount,
    AlreadyInProgress,
    Processed(DispatchSummary),
}

pub struct WebhookHandler {
    accounts: Arc<dyn AccountRepository>,
    states: Arc<dyn SyncStateRepository>,
    orchestrator: Arc<SyncOrchestrator>,
    dispatcher: Arc<ChunkDispatcher>,
}

impl WebhookHandler {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        states: Arc<dyn SyncStateRepository>,
        orchestrator: Arc<SyncOrchestrator>,
        dispatcher: Arc<ChunkDispatcher>,
    ) -> Self {
        Self { accounts, states, orchestrator, dispatcher }
    }

    #[instrument(skip(self, notification), fields(
        channel_id = %notification.channel_id,
        state = ?notification.resource_state
    ))]
    pub async fn handle(&self, notification: WebhookNotification) -> Result<WebhookOutcome> {
        if notification.resource_state != ResourceState::Exists {
            debug!("notification acknowledged without work");
            return Ok(WebhookOutcome::Acknowledged);
        }

        let Some(account_id) = notification.channel_token.as_deref() else {
            warn!("notification without channel token");
            return Ok(WebhookOutcome::UnknownAccount);
        };
        let Some(account) = self.accounts.get(account_id).await? else {
            warn!(account_id, "notification for unknown account");
            return Ok(WebhookOutcome::UnknownAccount);
        };

        let state = self.states.get(&account.id).await?;
        let current = state.channel.as_ref().is_some_and(|channel| {
            channel.channel_id == notification.channel_id
                && notification.resource_id.as_deref().map_or(true, |r| r == channel.resource_id)
        });
        if !current {
            info!(account_id = %account.id, "notification from stale channel ignored");
            return Ok(WebhookOutcome::StaleChannel);
        }

        let Some(lease) = self.orchestrator.acquire_fetch_lease(&account.id) else {
            info!(account_id = %account.id, "token fetch already in progress");
            return Ok(WebhookOutcome::AlreadyInProgress);
        };
        let change_set = self.orchestrator.fetch_and_advance(&account).await?;
        drop(lease);

        let summary = self.dispatcher.dispatch(&account.id, change_set.events).await?;
        Ok(WebhookOutcome::Processed(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_state_parsing() {
        assert_eq!("sync".parse::<ResourceState>().unwrap(), ResourceState::Sync);
        assert_eq!("EXISTS".parse::<ResourceState>().unwrap(), ResourceState::Exists);
        assert_eq!("not_exists".parse::<ResourceState>().unwrap(), ResourceState::NotExists);
        assert!("update".parse::<ResourceState>().is_err());
    }
}
