//! Configuration management for the sync client.

use crate::auth::Credentials;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tally_engine::DEFAULT_MAX_DRIFT_MS;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the sync server
    pub server_url: String,
    /// Password (re-authenticates on expiry) or a bare token
    pub credentials: Credentials,
    /// SQLite connection URL
    pub database_url: String,
    /// Fixed client id; generated and persisted when absent
    pub client_id: Option<String>,
    /// Retries for transient network failures within one sync
    pub sync_retries: u32,
    /// Delay before the first retry, doubled on each further attempt
    pub sync_backoff: Duration,
    /// Deadline for one sync including retries
    pub sync_timeout: Duration,
    /// How far the clock may run ahead of the wall clock
    pub max_drift_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_url = lookup("TALLY_SERVER_URL")
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingServerUrl)?
            .trim_end_matches('/')
            .to_string();

        let credentials = match (lookup("TALLY_PASSWORD"), lookup("TALLY_TOKEN")) {
            (Some(password), _) if !password.is_empty() => Credentials::Password(password),
            (_, Some(token)) if !token.is_empty() => Credentials::Token(token),
            _ => return Err(ConfigError::MissingCredentials),
        };

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://tally.db?mode=rwc".to_string());

        let client_id = lookup("TALLY_CLIENT_ID").filter(|id| !id.is_empty());

        Ok(Self {
            server_url,
            credentials,
            database_url,
            client_id,
            sync_retries: parse_or(&lookup, "TALLY_SYNC_RETRIES", 3)?,
            sync_backoff: Duration::from_millis(parse_or(&lookup, "TALLY_SYNC_BACKOFF_MS", 500)?),
            sync_timeout: Duration::from_secs(parse_or(&lookup, "TALLY_SYNC_TIMEOUT_SECS", 30)?),
            max_drift_ms: parse_or(&lookup, "TALLY_MAX_DRIFT_MS", DEFAULT_MAX_DRIFT_MS)?,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { var }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TALLY_SERVER_URL environment variable is required")]
    MissingServerUrl,

    #[error("TALLY_PASSWORD or TALLY_TOKEN environment variable is required")]
    MissingCredentials,

    #[error("Invalid {var} value")]
    Invalid { var: &'static str },
}
