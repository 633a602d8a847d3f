//! Provider-side event shapes and their normalized form.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_domain_status_conversions;

/// Provider event status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl_domain_status_conversions!(EventStatus {
    Confirmed => "confirmed",
    Tentative => "tentative",
    Cancelled => "cancelled",
});

impl EventStatus {
    /// Parses a provider status string; missing or unknown values count as
    /// confirmed.
    pub fn from_provider(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    pub fn is_cancelled(self) -> bool {
        self == Self::Cancelled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub response_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceEntryPoint {
    pub entry_point_type: String,
    pub uri: String,
}

/// One event as reported by the calendar provider. Transient; normalized
/// before storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub id: String,
    pub status: EventStatus,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub attendees: Vec<Attendee>,
    pub hangout_link: Option<String>,
    pub conference_entry_points: Vec<ConferenceEntryPoint>,
    pub recurring_event_id: Option<String>,
    pub original_start_time: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// Provider payload as received, appended to the event source history.
    pub raw: serde_json::Value,
}

impl ExternalEvent {
    /// Minimal event with the given id and status.
    pub fn new(id: impl Into<String>, status: EventStatus) -> Self {
        Self {
            id: id.into(),
            status,
            start: None,
            end: None,
            all_day: false,
            summary: None,
            description: None,
            location: None,
            attendees: Vec::new(),
            hangout_link: None,
            conference_entry_points: Vec::new(),
            recurring_event_id: None,
            original_start_time: None,
            updated: None,
            raw: serde_json::Value::Null,
        }
    }

    pub fn cancelled(id: impl Into<String>) -> Self {
        Self::new(id, EventStatus::Cancelled)
    }

    pub fn with_times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Meeting link: the hangout link, else the first video entry point.
    pub fn meeting_link(&self) -> Option<&str> {
        self.hangout_link.as_deref().filter(|l| !l.trim().is_empty()).or_else(|| {
            self.conference_entry_points
                .iter()
                .find(|ep| ep.entry_point_type == "video" && !ep.uri.trim().is_empty())
                .map(|ep| ep.uri.as_str())
        })
    }
}

/// Persisted display fields derived from one provider event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFields {
    pub name: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub location: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub guests: Vec<String>,
}

impl EventFields {
    pub fn start_date(&self) -> NaiveDate {
        self.start_at.date_naive()
    }
}
