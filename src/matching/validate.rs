//! Output validator: the only way classifier output becomes a `MatchResult`.
//!
//! A claim passes when its FAQ id (if any) exists in the knowledge base and
//! its confidence is a finite number within `[0, 1]`. Anything else is a
//! `Rejection`, and the caller falls back to the keyword matcher.

use super::semantic::{ClaimedConfidence, ClaimedFaq, MatchClaim};
use super::{MatchMethod, MatchResult};
use crate::knowledge::KnowledgeBase;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("missing faq_id field")]
    MissingFaqId,
    #[error("unknown faq id `{0}`")]
    UnknownFaq(String),
    #[error("missing confidence field")]
    MissingConfidence,
    #[error("non-numeric confidence {0}")]
    NonNumericConfidence(String),
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

pub fn validate(claim: MatchClaim, kb: &KnowledgeBase) -> Result<MatchResult, Rejection> {
    let confidence = match claim.confidence {
        ClaimedConfidence::Missing => return Err(Rejection::MissingConfidence),
        ClaimedConfidence::NotNumeric(raw) => return Err(Rejection::NonNumericConfidence(raw)),
        ClaimedConfidence::Value(v) if !v.is_finite() || !(0.0..=1.0).contains(&v) => {
            return Err(Rejection::ConfidenceOutOfRange(v))
        }
        ClaimedConfidence::Value(v) => v,
    };

    let faq_id = match claim.faq_id {
        ClaimedFaq::Missing => return Err(Rejection::MissingFaqId),
        ClaimedFaq::NoMatch => None,
        ClaimedFaq::Id(id) if kb.contains(&id) => Some(id),
        ClaimedFaq::Id(id) => return Err(Rejection::UnknownFaq(id)),
    };

    Ok(MatchResult {
        faq_id,
        confidence,
        method: MatchMethod::Semantic,
        reasoning: claim.reasoning,
    })
}
