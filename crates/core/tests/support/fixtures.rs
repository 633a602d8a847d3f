//! Fixture builders and wiring for sync scenarios.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use calsync_common::resilience::{BackoffStrategy, Jitter, RetryConfig};
use calsync_common::LeaseStore;
use calsync_core::{
    BatchSynchronizer, ChannelManager, ChannelSettings, ChunkDispatcher, ChunkProcessor,
    DeltaFetcher, OrphanReconciler, SyncOrchestrator, WebhookHandler,
};
use calsync_domain::{
    Account, Collection, EventFields, EventStatus, ExternalEvent, ProviderConfig, SyncConfig,
    SyncedEvent, WebhookConfig,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};

use super::{
    InMemoryAccounts, InMemoryCollections, InMemoryEventRepository, InMemorySyncStates,
    MockCalendarProvider, RecordingJobQueue,
};

pub const ACCOUNT: &str = "acct-1";

pub fn account() -> Account {
    Account {
        id: ACCOUNT.into(),
        email: "owner@example.com".into(),
        access_token: "token".into(),
        active: true,
    }
}

pub fn collection(id: &str) -> Collection {
    Collection { id: id.into(), account_id: ACCOUNT.into(), name: format!("Collection {id}") }
}

/// Today at `hour`:00 UTC, shifted by `days`.
pub fn day_at(days: i64, hour: u32) -> DateTime<Utc> {
    let today = Utc::now().date_naive() + Duration::days(days);
    Utc.from_utc_datetime(&today.and_hms_opt(hour, 0, 0).unwrap())
}

/// `<base>_<YYYYMMDDTHHMMSSZ>` for the given start.
pub fn occurrence_id(base: &str, start: DateTime<Utc>) -> String {
    format!("{base}_{}", start.format("%Y%m%dT%H%M%SZ"))
}

pub fn date_of(start: DateTime<Utc>) -> NaiveDate {
    start.date_naive()
}

pub fn event(id: &str, start: DateTime<Utc>) -> ExternalEvent {
    ExternalEvent::new(id, EventStatus::Confirmed)
        .with_times(start, start + Duration::hours(1))
        .with_summary(format!("Meeting {id}"))
}

pub fn cancelled(id: &str) -> ExternalEvent {
    ExternalEvent::cancelled(id)
}

pub fn stored_row(collection_id: &str, external_id: &str, start: DateTime<Utc>) -> SyncedEvent {
    SyncedEvent {
        id: format!("row-{collection_id}-{external_id}"),
        collection_id: collection_id.into(),
        owner_id: ACCOUNT.into(),
        external_id: external_id.into(),
        event_source_id: Some(format!("src-{external_id}")),
        fields: EventFields {
            name: format!("Stored {external_id}"),
            start_at: start,
            end_at: start + Duration::hours(1),
            location: "-".into(),
            link: None,
            description: None,
            guests: vec![],
        },
        created_at: start.with_hour(0).unwrap_or(start),
        updated_at: start,
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        backoff: BackoffStrategy::Fixed(StdDuration::from_millis(1)),
        jitter: Jitter::None,
        max_total_time: None,
    }
}

/// Every port double plus the services built on them.
pub struct Harness {
    pub provider: MockCalendarProvider,
    pub events: InMemoryEventRepository,
    pub states: InMemorySyncStates,
    pub accounts: InMemoryAccounts,
    pub collections: InMemoryCollections,
    pub jobs: RecordingJobQueue,
    pub leases: LeaseStore,
    pub config: SyncConfig,
    pub synchronizer: Arc<BatchSynchronizer>,
    pub reconciler: Arc<OrphanReconciler>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub dispatcher: Arc<ChunkDispatcher>,
}

impl Harness {
    pub fn new(collection_ids: &[&str]) -> Self {
        Self::with_states(collection_ids, InMemorySyncStates::new())
    }

    pub fn with_states(collection_ids: &[&str], states: InMemorySyncStates) -> Self {
        let provider = MockCalendarProvider::new();
        let events = InMemoryEventRepository::new();
        let accounts = InMemoryAccounts::new(vec![account()]);
        let collections =
            InMemoryCollections::new(collection_ids.iter().map(|id| collection(id)).collect());
        let jobs = RecordingJobQueue::new();
        let leases = LeaseStore::new(64);
        let config = SyncConfig::default();

        let synchronizer =
            Arc::new(BatchSynchronizer::new(Arc::new(events.clone()), config.clone()));
        let reconciler =
            Arc::new(OrphanReconciler::new(Arc::new(provider.clone()), Arc::new(events.clone())));
        let fetcher = Arc::new(DeltaFetcher::new(
            Arc::new(provider.clone()),
            Arc::new(events.clone()),
            Arc::new(states.clone()),
            config.bootstrap_months,
            fast_retry(),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(accounts.clone()),
            Arc::new(collections.clone()),
            Arc::new(states.clone()),
            fetcher,
            Arc::clone(&synchronizer),
            Arc::clone(&reconciler),
            Arc::new(jobs.clone()),
            leases.clone(),
        ));
        let processor = ChunkProcessor::new(
            Arc::new(provider.clone()),
            Arc::new(accounts.clone()),
            Arc::new(collections.clone()),
            Arc::clone(&synchronizer),
            Arc::clone(&reconciler),
            fast_retry(),
        );
        let dispatcher = Arc::new(ChunkDispatcher::new(processor, Arc::new(jobs.clone())));

        Self {
            provider,
            events,
            states,
            accounts,
            collections,
            jobs,
            leases,
            config,
            synchronizer,
            reconciler,
            orchestrator,
            dispatcher,
        }
    }

    pub fn webhook_handler(&self) -> WebhookHandler {
        WebhookHandler::new(
            Arc::new(self.accounts.clone()),
            Arc::new(self.states.clone()),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.dispatcher),
        )
    }

    pub fn channel_manager(&self, base_url: Option<&str>) -> ChannelManager {
        let settings = ChannelSettings::from_config(
            &WebhookConfig {
                public_base_url: base_url.map(str::to_string),
                ..WebhookConfig::default()
            },
            &ProviderConfig::default(),
        );
        ChannelManager::new(
            Arc::new(self.provider.clone()),
            Arc::new(self.accounts.clone()),
            Arc::new(self.states.clone()),
            Arc::new(self.jobs.clone()),
            settings,
            fast_retry(),
        )
    }
}
