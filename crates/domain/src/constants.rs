//! Application constants
//!
//! Centralized location for domain-level constants used throughout the
//! application.

// Identity
pub const OCCURRENCE_SEPARATOR: char = '_';

// Sync windows
pub const SYNC_WEEKS_PAST: i64 = 1;
pub const SYNC_WEEKS_FUTURE: i64 = 13;
pub const BOOTSTRAP_MONTHS: u32 = 3;

// Batching
pub const CHUNK_SIZE: usize = 50;
pub const FLUSH_EVERY: usize = 10;

// Provider paging
pub const PROVIDER_MAX_RESULTS: u32 = 2500;
pub const RECONCILE_MAX_PAGES: usize = 50;

// Watch channels
pub const CHANNEL_TTL_SECS: i64 = 604_800; // 7 days
pub const CHANNEL_RENEW_BEFORE_SECS: i64 = 86_400;
pub const CHANNEL_RETRY_BACKOFF_SECS: [u64; 3] = [60, 300, 900];
pub const CHANNEL_SETUP_ATTEMPTS: u32 = 3;
pub const WEBHOOK_PATH: &str = "/webhooks/calendar";

// Normalized display fields
pub const ONLINE_LOCATION: &str = "online";
pub const PLACEHOLDER_LOCATION: &str = "-";
pub const UNTITLED_EVENT: &str = "Untitled Event";

// Leases
pub const TOKEN_FETCH_LEASE_SECS: u64 = 300;
