//! Database implementations

pub mod account_repository;
pub mod manager;
pub mod sync_state_repository;
pub mod synced_event_repository;

pub use account_repository::{SqliteAccountRepository, SqliteCollectionRepository};
pub use manager::DbManager;
pub use sync_state_repository::SqliteSyncStateRepository;
pub use synced_event_repository::SqliteSyncedEventRepository;
