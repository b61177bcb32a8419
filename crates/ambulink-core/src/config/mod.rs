//! Runtime configuration for device and viewer clients.
//!
//! Values come from `AMBULINK_*` environment variables. Parsing goes through
//! [`ClientConfig::from_lookup`] so tests can supply a map instead of the
//! process environment.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;

use crate::util::{has_http_scheme, trimmed_non_empty};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::Error {
    fn from(error: ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Hub base URL without trailing slash; required for network commands
    pub hub_url: Option<String>,
    pub api_token: Option<String>,
    /// Ambulance unit id stamped onto captured records
    pub device_id: Option<String>,
    pub submit_timeout: Duration,
    pub sync_interval: Duration,
    pub join_timeout: Duration,
    pub reconnect_max_attempts: u32,
    pub probe_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            api_token: None,
            device_id: None,
            submit_timeout: Duration::from_secs(15),
            sync_interval: Duration::from_secs(30),
            join_timeout: Duration::from_secs(15),
            reconnect_max_attempts: 5,
            probe_interval: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("hub_url", &self.hub_url)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("device_id", &self.device_id)
            .field("submit_timeout", &self.submit_timeout)
            .field("sync_interval", &self.sync_interval)
            .field("join_timeout", &self.join_timeout)
            .field("reconnect_max_attempts", &self.reconnect_max_attempts)
            .field("probe_interval", &self.probe_interval)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let hub_url = optional_trimmed(&lookup, "AMBULINK_HUB_URL")
            .map(normalize_endpoint)
            .transpose()?;
        let api_token = optional_trimmed(&lookup, "AMBULINK_API_TOKEN");
        let device_id = optional_trimmed(&lookup, "AMBULINK_DEVICE_ID");

        let submit_timeout_secs =
            ranged_u64(&lookup, "AMBULINK_SUBMIT_TIMEOUT_SECS", 15, 1..=120)?;
        let sync_interval_secs =
            ranged_u64(&lookup, "AMBULINK_SYNC_INTERVAL_SECS", 30, 5..=3_600)?;
        let join_timeout_secs = ranged_u64(&lookup, "AMBULINK_JOIN_TIMEOUT_SECS", 15, 1..=120)?;
        let reconnect_max_attempts =
            ranged_u64(&lookup, "AMBULINK_RECONNECT_MAX_ATTEMPTS", 5, 1..=100)?;
        let probe_interval_secs =
            ranged_u64(&lookup, "AMBULINK_PROBE_INTERVAL_SECS", 10, 1..=600)?;

        Ok(Self {
            hub_url,
            api_token,
            device_id,
            submit_timeout: Duration::from_secs(submit_timeout_secs),
            sync_interval: Duration::from_secs(sync_interval_secs),
            join_timeout: Duration::from_secs(join_timeout_secs),
            reconnect_max_attempts: u32::try_from(reconnect_max_attempts).unwrap_or(u32::MAX),
            probe_interval: Duration::from_secs(probe_interval_secs),
        })
    }

    /// Hub base URL, or an error naming the variable to set.
    pub fn require_hub_url(&self) -> Result<&str, ConfigError> {
        self.hub_url
            .as_deref()
            .ok_or(ConfigError::MissingVar("AMBULINK_HUB_URL"))
    }

    /// WebSocket URL of the dispatch channel derived from the hub URL.
    pub fn channel_url(&self) -> Result<String, ConfigError> {
        let base = self.require_hub_url()?;
        let ws_base = base
            .strip_prefix("https://")
            .map(|rest| format!("wss://{rest}"))
            .or_else(|| base.strip_prefix("http://").map(|rest| format!("ws://{rest}")))
            .ok_or_else(|| ConfigError::Invalid(format!("unsupported hub URL: {base}")))?;
        Ok(format!("{ws_base}/v1/ws"))
    }
}

/// Trim, require an http(s) scheme and drop trailing slashes.
pub fn normalize_endpoint(raw: String) -> Result<String, ConfigError> {
    let endpoint = trimmed_non_empty(Some(raw))
        .ok_or_else(|| ConfigError::Invalid("endpoint must not be empty".to_string()))?;
    if has_http_scheme(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::Invalid(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

fn ranged_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    trimmed_non_empty(lookup(name))
}
