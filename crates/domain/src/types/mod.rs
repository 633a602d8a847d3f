//! Domain data types

pub mod event;
pub mod sync;
pub mod window;

pub use event::{Attendee, ConferenceEntryPoint, EventFields, EventStatus, ExternalEvent};
pub use sync::{
    Account, ApplyReport, ChangeSet, Collection, CommitReport, DeleteScope, Deletion,
    EventSource, NewSyncedEvent, RowFailure, RowUpdate, SourceUpsert, SyncMode, SyncState,
    SyncedEvent, WatchChannel, WatchRequest, WritePlan,
};
pub use window::SyncWindow;
