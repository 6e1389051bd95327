// src/config/ai.rs
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{parse_or, ConfigError};

pub const ENV_CLASSIFIER_PROVIDER: &str = "CLASSIFIER_PROVIDER";
pub const ENV_CLASSIFIER_MODEL: &str = "CLASSIFIER_MODEL";
pub const ENV_CLASSIFIER_MAX_TOKENS: &str = "CLASSIFIER_MAX_TOKENS";
pub const ENV_CLASSIFIER_TIMEOUT_SECONDS: &str = "CLASSIFIER_TIMEOUT_SECONDS";
pub const ENV_CLASSIFIER_MAX_CONTEXT_CHARS: &str = "CLASSIFIER_MAX_CONTEXT_CHARS";
pub const ENV_AI_TEST_MODE: &str = "AI_TEST_MODE";

pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_TIMEOUT_SECS: u64 = 12;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 16_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Mock,
    Disabled,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mock => "mock",
            ProviderKind::Disabled => "disabled",
        }
    }

    /// Env var holding the API key for this provider.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Mock | ProviderKind::Disabled => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-3-5-haiku-latest",
            ProviderKind::OpenAi => "gpt-4o-mini",
            ProviderKind::Mock | ProviderKind::Disabled => "none",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "mock" => Ok(ProviderKind::Mock),
            "disabled" | "off" | "none" => Ok(ProviderKind::Disabled),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct ClassifierConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub max_context_chars: usize,
}

// Never print the key itself; its length is enough for diagnostics.
impl fmt::Debug for ClassifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("key_len", &self.api_key.len())
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("max_context_chars", &self.max_context_chars)
            .finish()
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Disabled,
            model: ProviderKind::Disabled.default_model().to_string(),
            api_key: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

impl ClassifierConfig {
    pub fn mock() -> Self {
        Self {
            provider: ProviderKind::Mock,
            model: ProviderKind::Mock.default_model().to_string(),
            ..Self::default()
        }
    }

    /// Resolve from a key lookup (env in production, a map in tests).
    ///
    /// * `AI_TEST_MODE=mock` forces the mock provider.
    /// * A real provider without its API key is a configuration error.
    pub fn from_lookup<F>(get: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let forced_mock = get(ENV_AI_TEST_MODE).is_some_and(|v| v.trim() == "mock");
        let provider = if forced_mock {
            ProviderKind::Mock
        } else {
            match get(ENV_CLASSIFIER_PROVIDER).filter(|v| !v.trim().is_empty()) {
                Some(raw) => raw.parse()?,
                None => ProviderKind::Anthropic,
            }
        };

        let api_key = match provider.api_key_env() {
            Some(key) => get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))?,
            None => String::new(),
        };

        let model = get(ENV_CLASSIFIER_MODEL)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());

        let max_tokens: u32 = parse_or(get, ENV_CLASSIFIER_MAX_TOKENS, DEFAULT_MAX_TOKENS)?;
        let timeout_secs: u64 =
            parse_or(get, ENV_CLASSIFIER_TIMEOUT_SECONDS, DEFAULT_TIMEOUT_SECS)?;
        let max_context_chars: usize =
            parse_or(get, ENV_CLASSIFIER_MAX_CONTEXT_CHARS, DEFAULT_MAX_CONTEXT_CHARS)?;

        if max_tokens == 0 {
            return Err(ConfigError::Zero(ENV_CLASSIFIER_MAX_TOKENS));
        }
        if timeout_secs == 0 {
            return Err(ConfigError::Zero(ENV_CLASSIFIER_TIMEOUT_SECONDS));
        }
        if max_context_chars == 0 {
            return Err(ConfigError::Zero(ENV_CLASSIFIER_MAX_CONTEXT_CHARS));
        }

        Ok(Self {
            provider,
            model,
            api_key,
            max_tokens,
            timeout: Duration::from_secs(timeout_secs),
            max_context_chars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn anthropic_is_default_and_needs_key() {
        let err = ClassifierConfig::from_lookup(&lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("ANTHROPIC_API_KEY"));

        let cfg = ClassifierConfig::from_lookup(&lookup(&[("ANTHROPIC_API_KEY", "sk-test")])).unwrap();
        assert_eq!(cfg.provider, ProviderKind::Anthropic);
        assert_eq!(cfg.model, "claude-3-5-haiku-latest");
        assert_eq!(cfg.timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_mode_forces_mock() {
        let cfg = ClassifierConfig::from_lookup(&lookup(&[
            ("AI_TEST_MODE", "mock"),
            ("CLASSIFIER_PROVIDER", "openai"),
        ]))
        .unwrap();
        assert_eq!(cfg.provider, ProviderKind::Mock);
        assert!(cfg.api_key.is_empty());
    }

    #[test]
    fn provider_aliases_and_unknowns() {
        assert_eq!("Claude".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert_eq!("OFF".parse::<ProviderKind>().unwrap(), ProviderKind::Disabled);
        assert!(matches!(
            "gemini".parse::<ProviderKind>(),
            Err(ConfigError::UnknownProvider(p)) if p == "gemini"
        ));
    }

    #[test]
    fn debug_output_hides_key() {
        let cfg = ClassifierConfig::from_lookup(&lookup(&[
            ("CLASSIFIER_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-very-secret"),
        ]))
        .unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("sk-very-secret"));
        assert!(dbg.contains("key_len: 14"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ClassifierConfig::from_lookup(&lookup(&[
            ("CLASSIFIER_PROVIDER", "mock"),
            ("CLASSIFIER_TIMEOUT_SECONDS", "0"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Zero("CLASSIFIER_TIMEOUT_SECONDS"));
    }
}
