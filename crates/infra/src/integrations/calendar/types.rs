//! Google Calendar wire types and their conversion into provider-neutral
//! events.

use calsync_domain::{Attendee, ConferenceEntryPoint, EventStatus, ExternalEvent, WatchChannel};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One page of `events.list`. Items stay raw so the payload can be kept as
/// source history.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
    pub next_page_token: Option<String>,
    pub next_sync_token: Option<String>,
}

/// Minimal projection used by the status listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPage {
    #[serde(default)]
    pub items: Vec<StatusItem>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusItem {
    pub id: String,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEvent {
    pub id: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventDateTime>,
    pub end: Option<EventDateTime>,
    #[serde(default)]
    pub attendees: Vec<GoogleAttendee>,
    pub hangout_link: Option<String>,
    pub conference_data: Option<ConferenceData>,
    pub recurring_event_id: Option<String>,
    pub original_start_time: Option<EventDateTime>,
    pub updated: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
}

impl EventDateTime {
    fn is_all_day(&self) -> bool {
        self.date_time.is_none() && self.date.is_some()
    }

    /// Timed values convert to UTC; all-day dates map to midnight UTC.
    /// Unparseable values yield `None`.
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        if let Some(value) = &self.date_time {
            return parse_rfc3339(value);
        }
        let date = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAttendee {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub response_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceData {
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    pub entry_point_type: Option<String>,
    pub uri: Option<String>,
}

/// Body of `events.watch`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchBody<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub address: &'a str,
    pub token: &'a str,
    pub params: WatchParams,
}

#[derive(Debug, Serialize)]
pub struct WatchParams {
    pub ttl: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    pub id: String,
    pub resource_id: String,
    /// Milliseconds since the epoch, as a string.
    pub expiration: Option<String>,
}

impl WatchResponse {
    /// Channel with the provider's expiry, or `fallback` when it sent none.
    pub fn into_channel(self, fallback: DateTime<Utc>) -> WatchChannel {
        let expires_at = self
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or(fallback);
        WatchChannel { channel_id: self.id, resource_id: self.resource_id, expires_at }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopBody<'a> {
    pub id: &'a str,
    pub resource_id: &'a str,
}

/// Parse one raw item. Fails only when the payload lacks an id.
pub fn into_external_event(raw: serde_json::Value) -> Result<ExternalEvent, serde_json::Error> {
    let event: GoogleEvent = serde_json::from_value(raw.clone())?;
    let all_day = event.start.as_ref().is_some_and(EventDateTime::is_all_day);

    let status = EventStatus::from_provider(event.status.as_deref());
    let mut external = ExternalEvent::new(event.id, status);
    external.start = event.start.as_ref().and_then(EventDateTime::to_utc);
    external.end = event.end.as_ref().and_then(EventDateTime::to_utc);
    external.all_day = all_day;
    external.summary = event.summary;
    external.description = event.description;
    external.location = event.location;
    external.attendees = event
        .attendees
        .into_iter()
        .map(|a| Attendee {
            email: a.email,
            display_name: a.display_name,
            response_status: a.response_status,
        })
        .collect();
    external.hangout_link = event.hangout_link;
    external.conference_entry_points = event
        .conference_data
        .map(|data| data.entry_points)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|ep| {
            Some(ConferenceEntryPoint { entry_point_type: ep.entry_point_type?, uri: ep.uri? })
        })
        .collect();
    external.recurring_event_id = event.recurring_event_id;
    external.original_start_time =
        event.original_start_time.as_ref().and_then(EventDateTime::to_utc);
    external.updated = event.updated.as_deref().and_then(parse_rfc3339);
    external.raw = raw;
    Ok(external)
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.with_timezone(&Utc))
}
