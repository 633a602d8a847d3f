//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Attempt to build the configuration from `CALSYNC_*` variables
//! 2. If the required ones are missing, fall back to a config file
//! 3. Search standard locations when no file path is given
//! 4. JSON and TOML are both accepted, chosen by extension
//!
//! ## Environment Variables
//! Required:
//! - `CALSYNC_DB_PATH`: SQLite database file
//! - `CALSYNC_DB_POOL_SIZE`: connection pool size
//!
//! Optional (defaults apply when unset):
//! - `CALSYNC_PROVIDER_BASE_URL`, `CALSYNC_CALENDAR_ID`
//! - `CALSYNC_WEBHOOK_BASE_URL`: public callback base; channels are not
//!   created without it
//! - `CALSYNC_BIND_ADDR`: listen address of the webhook receiver
//! - `CALSYNC_SYNC_ENABLED`: periodic sync on/off
//! - `CALSYNC_DELTA_CRON`, `CALSYNC_RENEWAL_CRON`
//! - `CALSYNC_CHUNK_SIZE`, `CALSYNC_FLUSH_EVERY`
//!
//! ## File Locations
//! `config.{json,toml}` then `calsync.{json,toml}`, first in the working
//! directory and its two parents, then next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use calsync_domain::{CalsyncError, Config, DatabaseConfig, Result};

/// Load configuration, preferring the environment over files.
///
/// # Errors
/// Returns `CalsyncError::Config` when neither source yields a valid
/// configuration.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Environment incomplete, trying file");
            load_from_file(None)
        }
    }
}

/// Build configuration from `CALSYNC_*` variables on top of defaults.
///
/// # Errors
/// Returns `CalsyncError::Config` if a required variable is missing or any
/// numeric variable fails to parse.
pub fn load_from_env() -> Result<Config> {
    let database = DatabaseConfig {
        path: env_var("CALSYNC_DB_PATH")?,
        pool_size: env_parse("CALSYNC_DB_POOL_SIZE", env_var("CALSYNC_DB_POOL_SIZE")?)?,
    };

    let mut config = Config {
        database,
        provider: Default::default(),
        sync: Default::default(),
        webhook: Default::default(),
        retry: Default::default(),
    };

    if let Some(url) = env_opt("CALSYNC_PROVIDER_BASE_URL") {
        config.provider.api_base_url = url;
    }
    if let Some(calendar_id) = env_opt("CALSYNC_CALENDAR_ID") {
        config.provider.calendar_id = calendar_id;
    }
    config.webhook.public_base_url = env_opt("CALSYNC_WEBHOOK_BASE_URL");
    if let Some(addr) = env_opt("CALSYNC_BIND_ADDR") {
        config.webhook.bind_addr = addr;
    }

    config.sync.enabled = env_bool("CALSYNC_SYNC_ENABLED", config.sync.enabled);
    if let Some(cron) = env_opt("CALSYNC_DELTA_CRON") {
        config.sync.delta_cron = cron;
    }
    if let Some(cron) = env_opt("CALSYNC_RENEWAL_CRON") {
        config.sync.renewal_cron = cron;
    }
    if let Some(raw) = env_opt("CALSYNC_CHUNK_SIZE") {
        config.sync.chunk_size = env_parse("CALSYNC_CHUNK_SIZE", raw)?;
    }
    if let Some(raw) = env_opt("CALSYNC_FLUSH_EVERY") {
        config.sync.flush_every = env_parse("CALSYNC_FLUSH_EVERY", raw)?;
    }

    validate(&config)?;
    Ok(config)
}

/// Load configuration from a file, probing standard locations when `path`
/// is `None`.
///
/// # Errors
/// Returns `CalsyncError::Config` when the file is missing, unreadable, of
/// an unsupported format, or invalid.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CalsyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => find_config_file().ok_or_else(|| {
            CalsyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CalsyncError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    validate(&config)?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CalsyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CalsyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CalsyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.database.pool_size == 0 {
        return Err(CalsyncError::Config("database.pool_size must be at least 1".into()));
    }
    if config.sync.chunk_size == 0 {
        return Err(CalsyncError::Config("sync.chunk_size must be at least 1".into()));
    }
    if config.sync.flush_every == 0 {
        return Err(CalsyncError::Config("sync.flush_every must be at least 1".into()));
    }
    if config.webhook.renew_before_secs >= config.webhook.channel_ttl_secs {
        return Err(CalsyncError::Config(
            "webhook.renew_before_secs must be shorter than the channel TTL".into(),
        ));
    }
    Ok(())
}

/// First existing config file among the standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["config.json", "config.toml", "calsync.json", "calsync.toml"];

    let mut roots = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    let exe_dir = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf));
    roots.extend(exe_dir);

    roots
        .iter()
        .flat_map(|root| NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| CalsyncError::Config(format!("Missing required environment variable: {key}")))
}

/// Set and non-blank.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str, raw: String) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| CalsyncError::Config(format!("Invalid {key}: {e}")))
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
