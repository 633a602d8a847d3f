//! Calendar delta sync
//!
//! Three channels keep local rows consistent with the provider:
//! - periodic delta pulls ([`orchestrator`]),
//! - webhook deliveries ([`webhook`] and [`chunk_dispatcher`]),
//! - bounded reconciliation sweeps ([`reconciler`]).
//!
//! All of them share the [`normalizer`] and [`synchronizer`].

pub mod channel;
pub mod chunk_dispatcher;
pub mod delta;
pub mod dispatch;
pub mod index;
pub mod normalizer;
pub mod orchestrator;
pub mod ports;
pub mod reconciler;
pub mod retry;
pub mod synchronizer;
pub mod webhook;

pub use channel::{ChannelManager, ChannelOutcome, ChannelSettings, RenewalSummary};
pub use chunk_dispatcher::{Chunk, ChunkDispatcher, ChunkProcessor, DispatchSummary};
pub use delta::DeltaFetcher;
pub use dispatch::{change_kind, ChangeKind};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use ports::{
    AccountRepository, CalendarProvider, CollectionRepository, Job, JobFuture, JobQueue,
    SyncStateRepository, SyncedEventRepository,
};
pub use reconciler::OrphanReconciler;
pub use synchronizer::{BatchSynchronizer, NoMatchDecision, NoMatchPolicy, WindowedCreate};
pub use webhook::{ResourceState, WebhookHandler, WebhookNotification, WebhookOutcome};
