//! FAQ matching: the classifier-backed semantic path, its output validator,
//! and the deterministic keyword fallback.

pub mod classifier;
pub mod keyword;
pub mod semantic;
pub mod validate;

use serde::{Deserialize, Serialize};

pub use classifier::{build_classifier, Classifier, ClassifierError, DynClassifier, MockClassifier};
pub use keyword::match_keywords;
pub use semantic::{MatchClaim, SemanticMatcher};
pub use validate::{validate, Rejection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Semantic,
    Keyword,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Semantic => "semantic",
            MatchMethod::Keyword => "keyword",
        }
    }
}

/// Best FAQ candidate for one request. `faq_id` is `None` when nothing matched;
/// `confidence` is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub faq_id: Option<String>,
    pub confidence: f64,
    pub method: MatchMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl MatchResult {
    pub fn none(method: MatchMethod) -> Self {
        Self {
            faq_id: None,
            confidence: 0.0,
            method,
            reasoning: None,
        }
    }
}
