//! Environment-driven settings.
//!
//! Every knob has a default except `SUPPORT_CHANNEL_ID`. Values that are
//! present but unparsable, zero where a positive value is required, or
//! inconsistent (hint threshold at or above the answer threshold) are
//! startup errors; nothing is silently clamped.

pub mod ai;

use std::path::PathBuf;
use std::str::FromStr;

pub use ai::{ClassifierConfig, ProviderKind};

use crate::gate::injection::ENV_INJECTION_PATTERNS_PATH;
use crate::gate::rate_limit::{DEFAULT_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_WINDOW_SECS};
use crate::gate::sanitize::DEFAULT_MAX_MESSAGE_LENGTH;
use crate::knowledge::{DEFAULT_KNOWLEDGE_BASE_PATH, ENV_KNOWLEDGE_BASE_PATH};
use crate::policy::{
    ConfidencePolicy, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_PARTIAL_HINT_THRESHOLD,
};

pub const ENV_RATE_LIMIT_REQUESTS: &str = "RATE_LIMIT_REQUESTS";
pub const ENV_RATE_LIMIT_WINDOW_SECONDS: &str = "RATE_LIMIT_WINDOW_SECONDS";
pub const ENV_MAX_MESSAGE_LENGTH: &str = "MAX_MESSAGE_LENGTH";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "CONFIDENCE_THRESHOLD";
pub const ENV_PARTIAL_HINT_THRESHOLD: &str = "PARTIAL_HINT_THRESHOLD";
pub const ENV_RESPONSE_DELAY_SECONDS: &str = "RESPONSE_DELAY_SECONDS";
pub const ENV_SUPPORT_CHANNEL_ID: &str = "SUPPORT_CHANNEL_ID";
pub const ENV_TEAM_USERNAMES: &str = "TEAM_USERNAMES";
pub const ENV_SECURITY_LOG_PATH: &str = "SECURITY_LOG_PATH";
pub const ENV_SUPPORT_LOG_PATH: &str = "SUPPORT_LOG_PATH";
pub const ENV_DISCORD_WEBHOOK_URL: &str = "DISCORD_WEBHOOK_URL";

pub const DEFAULT_RESPONSE_DELAY_SECS: u64 = 300;
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
/// Used when `RUST_LOG` is unset. Lists every event target the crate emits.
pub const DEFAULT_LOG_FILTER: &str =
    "support_triage=info,triage=info,security=info,dispatch=info,classifier=info,api=info,audit=info,warn";
pub const DEFAULT_SECURITY_LOG_PATH: &str = "logs/security.jsonl";
pub const DEFAULT_SUPPORT_LOG_PATH: &str = "logs/support_events.jsonl";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse `{value}`")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be within [0, 1], got {value}")]
    OutOfUnitRange { key: &'static str, value: f64 },
    #[error("PARTIAL_HINT_THRESHOLD ({partial}) must be below CONFIDENCE_THRESHOLD ({confidence})")]
    MisorderedThresholds { partial: f64, confidence: f64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("unknown classifier provider `{0}`")]
    UnknownProvider(String),
}

/// Parse `key` when present and non-blank, else fall back to `default`.
pub(crate) fn parse_or<T, F>(get: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: v }),
        _ => Ok(default),
    }
}

/// `parse_or` against the process environment.
pub fn read_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    parse_or(&|k: &str| std::env::var(k).ok(), key, default)
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
    pub max_message_length: usize,
    pub confidence_threshold: f64,
    pub partial_hint_threshold: f64,
    pub response_delay_secs: u64,
    pub classifier: ClassifierConfig,
    pub support_channel_id: String,
    pub team_usernames: Vec<String>,
    pub knowledge_base_path: PathBuf,
    pub injection_patterns_path: Option<PathBuf>,
    pub security_log_path: PathBuf,
    pub support_log_path: PathBuf,
    pub discord_webhook_url: Option<String>,
}

impl Settings {
    /// Thresholds were validated on load.
    pub fn policy(&self) -> Result<ConfidencePolicy, ConfigError> {
        ConfidencePolicy::new(self.confidence_threshold, self.partial_hint_threshold)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|k: &str| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rate_limit_requests: usize =
            parse_or(get, ENV_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_REQUESTS)?;
        let rate_limit_window_secs: u64 = parse_or(
            get,
            ENV_RATE_LIMIT_WINDOW_SECONDS,
            DEFAULT_RATE_LIMIT_WINDOW_SECS,
        )?;
        let max_message_length: usize =
            parse_or(get, ENV_MAX_MESSAGE_LENGTH, DEFAULT_MAX_MESSAGE_LENGTH)?;
        let response_delay_secs: u64 =
            parse_or(get, ENV_RESPONSE_DELAY_SECONDS, DEFAULT_RESPONSE_DELAY_SECS)?;

        for (key, v) in [
            (ENV_RATE_LIMIT_REQUESTS, rate_limit_requests as u64),
            (ENV_RATE_LIMIT_WINDOW_SECONDS, rate_limit_window_secs),
            (ENV_MAX_MESSAGE_LENGTH, max_message_length as u64),
        ] {
            if v == 0 {
                return Err(ConfigError::Zero(key));
            }
        }

        let confidence_threshold: f64 =
            parse_or(get, ENV_CONFIDENCE_THRESHOLD, DEFAULT_CONFIDENCE_THRESHOLD)?;
        let partial_hint_threshold: f64 =
            parse_or(get, ENV_PARTIAL_HINT_THRESHOLD, DEFAULT_PARTIAL_HINT_THRESHOLD)?;
        ConfidencePolicy::new(confidence_threshold, partial_hint_threshold)?;

        // "0" was the historical placeholder for an unset channel.
        let support_channel_id = get(ENV_SUPPORT_CHANNEL_ID)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && v != "0")
            .ok_or(ConfigError::Missing(ENV_SUPPORT_CHANNEL_ID))?;

        let team_usernames = get(ENV_TEAM_USERNAMES)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let path_or = |key: &str, default: &str| {
            get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(default))
        };

        Ok(Self {
            rate_limit_requests,
            rate_limit_window_secs,
            max_message_length,
            confidence_threshold,
            partial_hint_threshold,
            response_delay_secs,
            classifier: ClassifierConfig::from_lookup(get)?,
            support_channel_id,
            team_usernames,
            knowledge_base_path: path_or(ENV_KNOWLEDGE_BASE_PATH, DEFAULT_KNOWLEDGE_BASE_PATH),
            injection_patterns_path: get(ENV_INJECTION_PATTERNS_PATH)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            security_log_path: path_or(ENV_SECURITY_LOG_PATH, DEFAULT_SECURITY_LOG_PATH),
            support_log_path: path_or(ENV_SUPPORT_LOG_PATH, DEFAULT_SUPPORT_LOG_PATH),
            discord_webhook_url: get(ENV_DISCORD_WEBHOOK_URL)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }
}
