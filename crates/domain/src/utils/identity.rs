//! Identity resolution for provider event ids.
//!
//! Recurring instances carry ids of the form `<base>_<YYYYMMDD[THHMMSS][Z]>`.
//! Everything here is total: malformed suffixes degrade to "not an
//! occurrence" instead of failing.

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use crate::constants::OCCURRENCE_SEPARATOR;

/// Shape of an external id as seen by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdShape {
    /// A single event or a whole recurring series.
    Base,
    /// One dated instance of a series.
    Occurrence { base_id: String, date: NaiveDate },
}

impl IdShape {
    pub fn classify(external_id: &str) -> Self {
        match extract_occurrence_date(external_id) {
            Some(date) => {
                Self::Occurrence { base_id: extract_base_id(external_id).to_string(), date }
            }
            None => Self::Base,
        }
    }

    pub fn is_occurrence(&self) -> bool {
        matches!(self, Self::Occurrence { .. })
    }
}

/// Substring before the first separator, or the whole id.
pub fn extract_base_id(external_id: &str) -> &str {
    external_id.split_once(OCCURRENCE_SEPARATOR).map_or(external_id, |(base, _)| base)
}

/// True iff the id carries a separator.
pub fn is_occurrence(external_id: &str) -> bool {
    external_id.contains(OCCURRENCE_SEPARATOR)
}

/// Calendar date embedded in an occurrence suffix.
pub fn extract_occurrence_date(external_id: &str) -> Option<NaiveDate> {
    let (_, suffix) = external_id.split_once(OCCURRENCE_SEPARATOR)?;
    let parsed = parse_compact_timestamp(suffix);
    if parsed.is_none() {
        debug!(external_id, suffix, "unparseable occurrence suffix");
    }
    parsed
}

fn parse_compact_timestamp(suffix: &str) -> Option<NaiveDate> {
    let compact = suffix.strip_suffix('Z').unwrap_or(suffix);
    let (date_part, time_part) = match compact.len() {
        8 => (compact, None),
        15 if compact.as_bytes().get(8) == Some(&b'T') => (&compact[..8], Some(&compact[9..])),
        _ => return None,
    };

    if !date_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y%m%d").ok()?;

    if let Some(time) = time_part {
        if !time.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        NaiveTime::parse_from_str(time, "%H%M%S").ok()?;
    }
    Some(date)
}

/// Dedup key for occurrences: `(base id, date)`.
pub fn occurrence_key(external_id: &str) -> Option<(String, NaiveDate)> {
    match IdShape::classify(external_id) {
        IdShape::Occurrence { base_id, date } => Some((base_id, date)),
        IdShape::Base => None,
    }
}
