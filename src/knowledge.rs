//! Knowledge base: curated FAQ entries plus server-level intake lists.
//!
//! On-disk format (JSON):
//!
//! ```json
//! {
//!   "faqs": [
//!     { "id": "webhook_signature", "category": "Webhooks",
//!       "question": "How do I verify a webhook signature?",
//!       "keywords": ["webhook", "signature", "verify"],
//!       "question_patterns": ["verify.*webhook"],
//!       "answer": "...", "docs_link": "https://..." }
//!   ],
//!   "team_usernames": ["alice"],
//!   "skip_patterns": ["looking into it"]
//! }
//! ```
//!
//! The knowledge base is read-only once loaded and is shared behind an `Arc`.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use crate::gate::sanitize::truncate_chars;

pub const ENV_KNOWLEDGE_BASE_PATH: &str = "KNOWLEDGE_BASE_PATH";
pub const DEFAULT_KNOWLEDGE_BASE_PATH: &str = "knowledge_base.json";

/// Answer text per entry in the classifier context.
const CONTEXT_ANSWER_PREVIEW: usize = 400;
const CONTEXT_TRUNCATED_MARKER: &str = "\n[Context truncated for length]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KnowledgeSource {
    #[default]
    Faq,
    SupportHistory,
    Docs,
    CodebaseAnalysis,
}

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("reading knowledge base {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing knowledge base: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("faq entry #{index} has an empty id")]
    EmptyId { index: usize },
    #[error("duplicate faq id `{0}`")]
    DuplicateId(String),
    #[error("faq `{id}` question pattern error: {source}")]
    Pattern {
        id: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub struct KnowledgeEntry {
    pub id: String,
    pub category: Option<String>,
    pub question: String,
    pub answer: String,
    /// Lowercased, whitespace-normalized keywords (single words or phrases).
    pub keywords: BTreeSet<String>,
    pub doc_link: Option<String>,
    pub source: KnowledgeSource,
    question_patterns: Vec<Regex>,
}

impl KnowledgeEntry {
    pub fn new(id: impl Into<String>, question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: None,
            question: question.into(),
            answer: answer.into(),
            keywords: BTreeSet::new(),
            doc_link: None,
            source: KnowledgeSource::Faq,
            question_patterns: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords
            .extend(keywords.into_iter().filter_map(|k| normalize_keyword(k.as_ref())));
        self
    }

    pub fn with_doc_link(mut self, link: impl Into<String>) -> Self {
        self.doc_link = Some(link.into());
        self
    }

    pub fn with_source(mut self, source: KnowledgeSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_question_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.question_patterns.push(compile_pattern(pattern)?);
        Ok(self)
    }

    /// Display topic for hints: the category when present, else the question.
    pub fn topic(&self) -> &str {
        self.category.as_deref().unwrap_or(&self.question)
    }

    pub fn matches_question_pattern(&self, text: &str) -> bool {
        self.question_patterns.iter().any(|re| re.is_match(text))
    }

    pub fn has_question_patterns(&self) -> bool {
        !self.question_patterns.is_empty()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

fn normalize_keyword(raw: &str) -> Option<String> {
    let k = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    (!k.is_empty()).then_some(k)
}

#[derive(Debug, Deserialize)]
struct RawKnowledgeFile {
    #[serde(default)]
    faqs: Vec<RawFaq>,
    #[serde(default)]
    team_usernames: Vec<String>,
    #[serde(default)]
    skip_patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFaq {
    id: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    question_patterns: Vec<String>,
    answer: String,
    #[serde(default, alias = "doc_link")]
    docs_link: Option<String>,
    #[serde(default)]
    source: KnowledgeSource,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
    index: HashMap<String, usize>,
    team_usernames: Vec<String>,
    skip_patterns: Vec<String>,
}

impl KnowledgeBase {
    pub fn load_from_file(path: &Path) -> Result<Self, KnowledgeError> {
        let content = fs::read_to_string(path).map_err(|source| KnowledgeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self, KnowledgeError> {
        let raw: RawKnowledgeFile = serde_json::from_str(json)?;
        let entries = raw
            .faqs
            .into_iter()
            .map(|f| {
                let question = f
                    .question
                    .or_else(|| f.category.clone())
                    .unwrap_or_else(|| f.id.clone());
                let question_patterns = f
                    .question_patterns
                    .iter()
                    .map(|p| compile_pattern(p))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| KnowledgeError::Pattern {
                        id: f.id.clone(),
                        source,
                    })?;
                let mut entry = KnowledgeEntry::new(f.id, question, f.answer)
                    .with_keywords(&f.keywords)
                    .with_source(f.source);
                entry.category = f.category;
                entry.doc_link = f.docs_link.filter(|l| !l.trim().is_empty());
                entry.question_patterns = question_patterns;
                Ok(entry)
            })
            .collect::<Result<Vec<_>, KnowledgeError>>()?;

        let mut kb = Self::from_entries(entries)?;
        kb.team_usernames = raw.team_usernames;
        kb.skip_patterns = raw
            .skip_patterns
            .into_iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.trim().is_empty())
            .collect();
        Ok(kb)
    }

    /// Build from entries; ids must be unique and non-empty.
    pub fn from_entries(entries: Vec<KnowledgeEntry>) -> Result<Self, KnowledgeError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, e) in entries.iter().enumerate() {
            if e.id.trim().is_empty() {
                return Err(KnowledgeError::EmptyId { index: i });
            }
            if index.insert(e.id.clone(), i).is_some() {
                return Err(KnowledgeError::DuplicateId(e.id.clone()));
            }
        }
        Ok(Self {
            entries,
            index,
            ..Self::default()
        })
    }

    pub fn with_team_usernames<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.team_usernames = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn get(&self, id: &str) -> Option<&KnowledgeEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Entries in file order (ties in scoring keep the earlier one).
    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn team_usernames(&self) -> &[String] {
        &self.team_usernames
    }

    pub fn skip_patterns(&self) -> &[String] {
        &self.skip_patterns
    }

    /// Case-insensitive substring match against the skip list.
    pub fn matches_skip_pattern(&self, text: &str) -> bool {
        if self.skip_patterns.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.skip_patterns.iter().any(|p| lower.contains(p.as_str()))
    }

    /// JSON rendering of the corpus for the classifier prompt, cut at
    /// `max_chars` characters.
    pub fn corpus_context(&self, max_chars: usize) -> String {
        #[derive(Serialize)]
        struct ContextEntry<'a> {
            id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            category: Option<&'a str>,
            question: &'a str,
            keywords: Vec<&'a str>,
            answer: String,
        }

        let rows: Vec<ContextEntry<'_>> = self
            .entries
            .iter()
            .map(|e| ContextEntry {
                id: &e.id,
                category: e.category.as_deref(),
                question: &e.question,
                keywords: e.keywords.iter().map(String::as_str).collect(),
                answer: truncate_chars(&e.answer, CONTEXT_ANSWER_PREVIEW),
            })
            .collect();

        let json = serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string());
        if json.chars().count() <= max_chars {
            return json;
        }
        let mut cut = truncate_chars(&json, max_chars);
        cut.push_str(CONTEXT_TRUNCATED_MARKER);
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "faqs": [
            {"id": "webhooks", "category": "Webhooks",
             "keywords": ["Webhook", "  signing   secret ", ""],
             "question_patterns": ["verify.*webhook"],
             "answer": "Use the signing secret.", "docs_link": "https://docs.example.com/webhooks"},
            {"id": "domains", "question": "Why is my domain not verified?",
             "keywords": ["domain", "dns"], "answer": "Check DNS records.", "docs_link": ""}
        ],
        "team_usernames": ["alice"],
        "skip_patterns": ["Looking Into It"]
    }"#;

    #[test]
    fn parses_file_format() {
        let kb = KnowledgeBase::from_json_str(SAMPLE).unwrap();
        assert_eq!(kb.len(), 2);

        let w = kb.get("webhooks").unwrap();
        assert_eq!(w.question, "Webhooks");
        assert_eq!(w.topic(), "Webhooks");
        assert!(w.keywords.contains("webhook"));
        assert!(w.keywords.contains("signing secret"));
        assert_eq!(w.keywords.len(), 2);
        assert!(w.matches_question_pattern("How do I VERIFY my webhook?"));

        let d = kb.get("domains").unwrap();
        assert_eq!(d.doc_link, None);
        assert_eq!(d.topic(), "Why is my domain not verified?");

        assert_eq!(kb.team_usernames(), ["alice".to_string()]);
        assert!(kb.matches_skip_pattern("I'm looking into it now"));
    }

    #[test]
    fn rejects_duplicates_and_bad_patterns() {
        let dup = r#"{"faqs":[{"id":"a","answer":"x"},{"id":"a","answer":"y"}]}"#;
        assert!(matches!(
            KnowledgeBase::from_json_str(dup),
            Err(KnowledgeError::DuplicateId(id)) if id == "a"
        ));

        let bad = r#"{"faqs":[{"id":"a","answer":"x","question_patterns":["("]}]}"#;
        assert!(matches!(
            KnowledgeBase::from_json_str(bad),
            Err(KnowledgeError::Pattern { .. })
        ));

        let empty = r#"{"faqs":[{"id":" ","answer":"x"}]}"#;
        assert!(matches!(
            KnowledgeBase::from_json_str(empty),
            Err(KnowledgeError::EmptyId { index: 0 })
        ));
    }

    #[test]
    fn corpus_context_is_capped() {
        let kb = KnowledgeBase::from_json_str(SAMPLE).unwrap();
        let full = kb.corpus_context(100_000);
        assert!(full.contains("\"webhooks\""));
        assert!(!full.contains("truncated"));

        let cut = kb.corpus_context(40);
        assert!(cut.ends_with(CONTEXT_TRUNCATED_MARKER));
        assert_eq!(
            cut.chars().count(),
            40 + CONTEXT_TRUNCATED_MARKER.chars().count()
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = KnowledgeBase::load_from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, KnowledgeError::Io { .. }));
    }
}
