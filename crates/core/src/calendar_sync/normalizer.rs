//! Maps provider events onto persisted display fields.

use calsync_domain::constants::{ONLINE_LOCATION, PLACEHOLDER_LOCATION, UNTITLED_EVENT};
use calsync_domain::{EventFields, ExternalEvent, SourceUpsert};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Normalize one provider event.
///
/// Returns `None` (with a warning) for events that carry neither a start nor
/// an end; those are never persisted. When only one bound is present it is
/// used for both.
pub fn normalize(event: &ExternalEvent) -> Option<EventFields> {
    let (start_at, end_at) = match (event.start, event.end) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, start),
        (None, Some(end)) => (end, end),
        (None, None) => {
            warn!(external_id = %event.id, "event has no start or end, skipping");
            return None;
        }
    };

    let link = event.meeting_link().map(str::to_string);

    Some(EventFields {
        name: event
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNTITLED_EVENT)
            .to_string(),
        start_at,
        end_at,
        location: resolve_location(event.location.as_deref(), link.is_some()),
        link,
        description: event.description.clone().filter(|d| !d.trim().is_empty()),
        guests: guest_emails(event),
    })
}

/// Explicit location, then "online" when a meeting link exists, then the
/// placeholder.
fn resolve_location(location: Option<&str>, has_link: bool) -> String {
    match location.map(str::trim).filter(|l| !l.is_empty()) {
        Some(explicit) => explicit.to_string(),
        None if has_link => ONLINE_LOCATION.to_string(),
        None => PLACEHOLDER_LOCATION.to_string(),
    }
}

fn guest_emails(event: &ExternalEvent) -> Vec<String> {
    let mut guests: Vec<String> = Vec::with_capacity(event.attendees.len());
    for email in event.attendees.iter().filter_map(|a| a.email.as_deref()) {
        let email = email.trim();
        if !is_plausible_email(email) {
            continue;
        }
        if !guests.iter().any(|g| g.eq_ignore_ascii_case(email)) {
            guests.push(email.to_string());
        }
    }
    guests
}

fn is_plausible_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Event source write for one sighting of `event`.
pub fn source_upsert(
    owner_id: &str,
    event: &ExternalEvent,
    synced_at: DateTime<Utc>,
) -> SourceUpsert {
    SourceUpsert {
        owner_id: owner_id.to_string(),
        external_id: event.id.clone(),
        payload: event.raw.clone(),
        synced_at,
    }
}
