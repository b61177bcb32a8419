use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct HubConfig {
    pub bind_addr: String,
    pub api_token: String,
    /// ETA applied when a record does not carry one
    pub default_eta: Duration,
    pub room_channel_capacity: usize,
    pub rate_limit_window: Duration,
    pub record_rate_limit_per_window: u32,
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HubConfig")
            .field("bind_addr", &self.bind_addr)
            .field("api_token", &"[REDACTED]")
            .field("default_eta", &self.default_eta)
            .field("room_channel_capacity", &self.room_channel_capacity)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "record_rate_limit_per_window",
                &self.record_rate_limit_per_window,
            )
            .finish()
    }
}

impl HubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "HUB_BIND_ADDR", "127.0.0.1:8080");
        let api_token = required_trimmed(&lookup, "HUB_API_TOKEN")?;

        let default_eta_minutes = value_or_default(&lookup, "HUB_DEFAULT_ETA_MINUTES", "15")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "HUB_DEFAULT_ETA_MINUTES must be an integer in [1, 240]".to_string(),
                )
            })?;
        if !(1..=240).contains(&default_eta_minutes) {
            return Err(ConfigError::Invalid(
                "HUB_DEFAULT_ETA_MINUTES must be in [1, 240]".to_string(),
            ));
        }

        let room_channel_capacity =
            value_or_default(&lookup, "HUB_ROOM_CHANNEL_CAPACITY", "256")
                .parse::<usize>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "HUB_ROOM_CHANNEL_CAPACITY must be an integer in [16, 65536]".to_string(),
                    )
                })?;
        if !(16..=65_536).contains(&room_channel_capacity) {
            return Err(ConfigError::Invalid(
                "HUB_ROOM_CHANNEL_CAPACITY must be in [16, 65536]".to_string(),
            ));
        }

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let record_rate_limit_per_window =
            value_or_default(&lookup, "RECORD_RATE_LIMIT_PER_WINDOW", "120")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "RECORD_RATE_LIMIT_PER_WINDOW must be an integer in [1, 5000]".to_string(),
                    )
                })?;
        if !(1..=5_000).contains(&record_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "RECORD_RATE_LIMIT_PER_WINDOW must be in [1, 5000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            api_token,
            default_eta: Duration::from_secs(default_eta_minutes * 60),
            room_channel_capacity,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            record_rate_limit_per_window,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
