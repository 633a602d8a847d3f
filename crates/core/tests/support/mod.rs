//! Shared test helpers for `calsync-core` integration tests.
//!
//! In-memory doubles for every port plus fixture builders, so scenarios can
//! focus on sync behaviour instead of wiring.
#![allow(dead_code)]

pub mod calendar;
pub mod fixtures;
pub mod repositories;

pub use calendar::MockCalendarProvider;
pub use fixtures::*;
pub use repositories::{
    InMemoryAccounts, InMemoryCollections, InMemoryEventRepository, InMemorySyncStates,
    RecordingJobQueue,
};
