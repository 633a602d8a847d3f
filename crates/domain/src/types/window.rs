//! Bounded time windows used for sync, bootstrap and reconciliation.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` UTC interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Active window: start of day `weeks_past` weeks ago through the end of
    /// the day `weeks_future` weeks ahead.
    pub fn active(now: DateTime<Utc>, weeks_past: i64, weeks_future: i64) -> Self {
        let start = start_of_day(now.date_naive() - Duration::weeks(weeks_past));
        let last_day = now.date_naive() + Duration::weeks(weeks_future);
        let end = start_of_day(last_day + Duration::days(1));
        Self { start, end }
    }

    /// Bootstrap window: today through `months` months ahead.
    pub fn bootstrap(now: DateTime<Utc>, months: u32) -> Self {
        let start = start_of_day(now.date_naive());
        let end = now.checked_add_months(Months::new(months)).unwrap_or(now + Duration::days(90));
        Self { start, end }
    }

    /// The calendar month containing `now`.
    pub fn month_of(now: DateTime<Utc>) -> Self {
        let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1).unwrap_or(now.date_naive());
        let next = first.checked_add_months(Months::new(1)).unwrap_or(first + Duration::days(31));
        Self { start: start_of_day(first), end: start_of_day(next) }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Whether any part of `date` (UTC) falls inside the window.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        let day_start = start_of_day(date);
        let day_end = day_start + Duration::days(1);
        day_start < self.end && day_end > self.start
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
