//! Security gating in front of the semantic matcher.
//!
//! Every sanitized request passes through an ordered chain of stages. The
//! first stage that objects downgrades the request to the keyword path; a
//! downgraded request never reaches the classifier. The rate limit stage
//! runs first, so a user over the cap cannot probe the pattern set.

pub mod injection;
pub mod rate_limit;
pub mod sanitize;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub use injection::{InjectionDetector, Scan};
pub use rate_limit::{Admission, RateLimitParams, RateLimiter};
pub use sanitize::Sanitizer;

use crate::audit::SecurityEventKind;

/// Why a request took the keyword path instead of the classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Downgrade {
    RateLimited,
    InjectionDetected { pattern_id: String },
    ClassifierFailed { detail: String },
    InvalidOutput { detail: String },
}

impl Downgrade {
    /// Metric / log label.
    pub fn label(&self) -> &'static str {
        match self {
            Downgrade::RateLimited => "rate_limited",
            Downgrade::InjectionDetected { .. } => "injection_detected",
            Downgrade::ClassifierFailed { .. } => "classifier_failed",
            Downgrade::InvalidOutput { .. } => "invalid_output",
        }
    }

    pub fn security_kind(&self) -> SecurityEventKind {
        match self {
            Downgrade::RateLimited => SecurityEventKind::RateLimited,
            Downgrade::InjectionDetected { .. } => SecurityEventKind::InjectionDetected,
            Downgrade::ClassifierFailed { .. } => SecurityEventKind::MatcherError,
            Downgrade::InvalidOutput { .. } => SecurityEventKind::InvalidOutput,
        }
    }

    /// Short detail for the security log.
    pub fn detail(&self) -> String {
        match self {
            Downgrade::RateLimited => "request cap exceeded".to_string(),
            Downgrade::InjectionDetected { pattern_id } => format!("pattern {pattern_id}"),
            Downgrade::ClassifierFailed { detail } | Downgrade::InvalidOutput { detail } => {
                detail.clone()
            }
        }
    }
}

/// What a gate stage sees.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub user_id: &'a str,
    pub text: &'a str,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Proceed,
    Downgrade(Downgrade),
}

pub trait GateStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, input: &GateInput<'_>) -> GateVerdict;
}

impl GateStage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn check(&self, input: &GateInput<'_>) -> GateVerdict {
        match self.admit(input.user_id, input.now) {
            Admission::Allowed => GateVerdict::Proceed,
            Admission::Denied => GateVerdict::Downgrade(Downgrade::RateLimited),
        }
    }
}

impl GateStage for InjectionDetector {
    fn name(&self) -> &'static str {
        "injection"
    }

    fn check(&self, input: &GateInput<'_>) -> GateVerdict {
        match self.scan(input.text) {
            Scan::Clean => GateVerdict::Proceed,
            Scan::Suspicious { pattern_id } => {
                GateVerdict::Downgrade(Downgrade::InjectionDetected { pattern_id })
            }
        }
    }
}

/// Ordered gate stages; evaluation stops at the first downgrade.
#[derive(Clone, Default)]
pub struct GateChain {
    stages: Vec<Arc<dyn GateStage>>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn GateStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn evaluate(&self, input: &GateInput<'_>) -> Option<Downgrade> {
        self.stages.iter().find_map(|stage| match stage.check(input) {
            GateVerdict::Proceed => None,
            GateVerdict::Downgrade(d) => Some(d),
        })
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}
