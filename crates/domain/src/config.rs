//! Application configuration structures
//!
//! Every section except `database` has defaults, so a minimal file only
//! needs the database path and pool size.

use serde::{Deserialize, Serialize};

use crate::constants::{
    BOOTSTRAP_MONTHS, CHANNEL_RENEW_BEFORE_SECS, CHANNEL_RETRY_BACKOFF_SECS,
    CHANNEL_SETUP_ATTEMPTS, CHANNEL_TTL_SECS, CHUNK_SIZE, FLUSH_EVERY, SYNC_WEEKS_FUTURE,
    SYNC_WEEKS_PAST,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base_url: String,
    pub calendar_id: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            calendar_id: "primary".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub weeks_past: i64,
    pub weeks_future: i64,
    pub bootstrap_months: u32,
    pub chunk_size: usize,
    pub flush_every: usize,
    /// Six-field cron expression for the periodic delta sync.
    pub delta_cron: String,
    /// Six-field cron expression for channel renewal.
    pub renewal_cron: String,
    pub job_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weeks_past: SYNC_WEEKS_PAST,
            weeks_future: SYNC_WEEKS_FUTURE,
            bootstrap_months: BOOTSTRAP_MONTHS,
            chunk_size: CHUNK_SIZE,
            flush_every: FLUSH_EVERY,
            delta_cron: "0 */15 * * * *".to_string(),
            renewal_cron: "0 0 * * * *".to_string(),
            job_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Public base URL the provider calls back; channels are not created
    /// without it.
    pub public_base_url: Option<String>,
    pub bind_addr: String,
    pub channel_ttl_secs: i64,
    pub renew_before_secs: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            public_base_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            channel_ttl_secs: CHANNEL_TTL_SECS,
            renew_before_secs: CHANNEL_RENEW_BEFORE_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub channel_attempts: u32,
    pub channel_backoff_secs: Vec<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            channel_attempts: CHANNEL_SETUP_ATTEMPTS,
            channel_backoff_secs: CHANNEL_RETRY_BACKOFF_SECS.to_vec(),
        }
    }
}
