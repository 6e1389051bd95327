//! Keyword matcher: deterministic fallback scoring.
//!
//! For each entry, in knowledge-base order:
//! - a single-word keyword counts 1.0 when the text contains that word
//!   (plain `s`/`es` plurals included), or 0.5 for a near-miss typo
//!   (normalized Levenshtein >= 0.85, both words at least 5 chars);
//! - a multi-word keyword counts 1.0 when the phrase occurs in the text;
//! - coverage = hits / keyword count;
//! - when coverage > 0 and one of the entry's question patterns matches,
//!   add 0.3; the total is capped at 1.0.
//!
//! The highest score wins; ties keep the earlier entry. A score of 0 yields
//! no match.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use strsim::normalized_levenshtein;

use super::{MatchMethod, MatchResult};
use crate::knowledge::{KnowledgeBase, KnowledgeEntry};

pub const PATTERN_BONUS: f64 = 0.3;
const FUZZY_HIT: f64 = 0.5;
const FUZZY_MIN_SIMILARITY: f64 = 0.85;
const FUZZY_MIN_LEN: usize = 5;

// \w is Unicode-aware by default in the regex crate
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word regex"));

/// Lowercased word tokens, in order.
pub fn tokenize(input: &str) -> Vec<String> {
    WORD_RE
        .find_iter(input)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Tokenized view of one message, reused across entries.
struct TextView {
    tokens: HashSet<String>,
    /// Tokens joined by single spaces and padded, for phrase lookups.
    padded: String,
}

impl TextView {
    fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        let padded = format!(" {} ", tokens.join(" "));
        Self {
            tokens: tokens.into_iter().collect(),
            padded,
        }
    }

    fn keyword_hit(&self, keyword: &str) -> f64 {
        let kw_tokens = tokenize(keyword);
        match kw_tokens.as_slice() {
            [] => 0.0,
            [word] => self.word_hit(word),
            many => {
                let phrase = format!(" {} ", many.join(" "));
                if self.padded.contains(&phrase) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn word_hit(&self, word: &str) -> f64 {
        if self.tokens.iter().any(|t| same_word(t, word)) {
            return 1.0;
        }
        if word.chars().count() >= FUZZY_MIN_LEN
            && self.tokens.iter().any(|t| {
                t.chars().count() >= FUZZY_MIN_LEN
                    && normalized_levenshtein(t, word) >= FUZZY_MIN_SIMILARITY
            })
        {
            return FUZZY_HIT;
        }
        0.0
    }
}

fn same_word(token: &str, keyword: &str) -> bool {
    token == keyword
        || token.strip_suffix('s') == Some(keyword)
        || token.strip_suffix("es") == Some(keyword)
}

fn score_entry(view: &TextView, raw: &str, entry: &KnowledgeEntry) -> f64 {
    if entry.keywords.is_empty() {
        return 0.0;
    }
    let hits: f64 = entry.keywords.iter().map(|k| view.keyword_hit(k)).sum();
    let coverage = hits / entry.keywords.len() as f64;
    if coverage <= 0.0 {
        return 0.0;
    }
    let bonus = if entry.matches_question_pattern(raw) {
        PATTERN_BONUS
    } else {
        0.0
    };
    (coverage + bonus).min(1.0)
}

/// Best keyword match for already-sanitized text. Total and deterministic.
pub fn match_keywords(text: &str, kb: &KnowledgeBase) -> MatchResult {
    let view = TextView::new(text);
    let mut best: Option<(&KnowledgeEntry, f64)> = None;

    for entry in kb.entries() {
        let score = score_entry(&view, text, entry);
        if score > best.map_or(0.0, |(_, s)| s) {
            best = Some((entry, score));
        }
    }

    match best {
        Some((entry, score)) => MatchResult {
            faq_id: Some(entry.id.clone()),
            confidence: score,
            method: MatchMethod::Keyword,
            reasoning: Some(format!("keyword coverage {score:.2}")),
        },
        None => MatchResult::none(MatchMethod::Keyword),
    }
}
