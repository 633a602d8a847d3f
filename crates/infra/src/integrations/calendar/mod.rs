//! Calendar provider integration (Google Calendar v3)

pub mod providers;
pub mod types;

pub use providers::GoogleCalendarProvider;
