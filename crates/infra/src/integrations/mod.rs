//! External service integrations

pub mod calendar;

pub use calendar::GoogleCalendarProvider;
