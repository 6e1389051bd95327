//! # Confidence Policy
//! Pure mapping from a `MatchResult` to an action. No I/O.
//!
//! - no FAQ id → `Ignore`
//! - confidence >= answer threshold → `Answer` (scheduled, delayed)
//! - confidence >= hint threshold → `Hint` (sent right away)
//! - otherwise → `Ignore`

use serde::Serialize;

use crate::config::{ConfigError, ENV_CONFIDENCE_THRESHOLD, ENV_PARTIAL_HINT_THRESHOLD};
use crate::matching::MatchResult;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
pub const DEFAULT_PARTIAL_HINT_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "faq_id", rename_all = "snake_case")]
pub enum Action {
    Answer(String),
    Hint(String),
    Ignore,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Answer(_) => "answer",
            Action::Hint(_) => "hint",
            Action::Ignore => "ignore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidencePolicy {
    confidence_threshold: f64,
    partial_hint_threshold: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            partial_hint_threshold: DEFAULT_PARTIAL_HINT_THRESHOLD,
        }
    }
}

impl ConfidencePolicy {
    /// Both thresholds in `[0, 1]`, hint strictly below answer.
    pub fn new(
        confidence_threshold: f64,
        partial_hint_threshold: f64,
    ) -> Result<Self, ConfigError> {
        for (key, v) in [
            (ENV_CONFIDENCE_THRESHOLD, confidence_threshold),
            (ENV_PARTIAL_HINT_THRESHOLD, partial_hint_threshold),
        ] {
            if !(v.is_finite() && (0.0..=1.0).contains(&v)) {
                return Err(ConfigError::OutOfUnitRange { key, value: v });
            }
        }
        if partial_hint_threshold >= confidence_threshold {
            return Err(ConfigError::MisorderedThresholds {
                partial: partial_hint_threshold,
                confidence: confidence_threshold,
            });
        }
        Ok(Self {
            confidence_threshold,
            partial_hint_threshold,
        })
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn partial_hint_threshold(&self) -> f64 {
        self.partial_hint_threshold
    }

    pub fn decide(&self, m: &MatchResult) -> Action {
        let Some(id) = m.faq_id.as_ref() else {
            return Action::Ignore;
        };
        if m.confidence >= self.confidence_threshold {
            Action::Answer(id.clone())
        } else if m.confidence >= self.partial_hint_threshold {
            Action::Hint(id.clone())
        } else {
            Action::Ignore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchMethod;

    fn m(id: Option<&str>, confidence: f64) -> MatchResult {
        MatchResult {
            faq_id: id.map(str::to_string),
            confidence,
            method: MatchMethod::Semantic,
            reasoning: None,
        }
    }

    #[test]
    fn bands() {
        let p = ConfidencePolicy::default();
        assert_eq!(p.decide(&m(Some("a"), 0.82)), Action::Answer("a".into()));
        assert_eq!(p.decide(&m(Some("a"), 0.5)), Action::Answer("a".into()));
        assert_eq!(p.decide(&m(Some("a"), 0.49)), Action::Hint("a".into()));
        assert_eq!(p.decide(&m(Some("a"), 0.3)), Action::Hint("a".into()));
        assert_eq!(p.decide(&m(Some("a"), 0.29)), Action::Ignore);
        assert_eq!(p.decide(&m(Some("a"), 0.0)), Action::Ignore);
    }

    #[test]
    fn no_id_is_always_ignore() {
        let p = ConfidencePolicy::default();
        assert_eq!(p.decide(&m(None, 1.0)), Action::Ignore);
    }

    #[test]
    fn constructor_validates() {
        assert!(ConfidencePolicy::new(0.7, 0.2).is_ok());
        assert!(ConfidencePolicy::new(0.3, 0.3).is_err());
        assert!(ConfidencePolicy::new(1.2, 0.3).is_err());
        assert!(ConfidencePolicy::new(0.5, f64::NAN).is_err());
    }

    #[test]
    fn action_serializes_with_tag() {
        let v = serde_json::to_value(Action::Hint("x".into())).unwrap();
        assert_eq!(v["action"], "hint");
        assert_eq!(v["faq_id"], "x");
        assert_eq!(Action::Ignore.label(), "ignore");
    }
}
