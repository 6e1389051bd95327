//! Append-only audit trails: security events and support outcomes.
//!
//! Each trail writes one JSON object per line to its sink and keeps the most
//! recent records in memory for the debug endpoints. Write failures are
//! reported through `tracing` and never interrupt request handling.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::gate::sanitize::truncate_chars;
use crate::matching::{MatchMethod, MatchResult};

const RECENT_CAP: usize = 200;
const QUESTION_MAX_CHARS: usize = 200;

/// Short stable fingerprint of user text; logs carry this, never the text.
pub fn fingerprint(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A record that can be appended to an `AuditTrail`.
pub trait AuditRecord: Serialize + Clone + Send {
    /// Mirror the record into the tracing stream.
    fn trace(&self);
}

pub struct AuditTrail<T> {
    name: &'static str,
    writer: Mutex<Box<dyn Write + Send>>,
    recent: Mutex<VecDeque<T>>,
    total: AtomicU64,
}

impl<T: AuditRecord> AuditTrail<T> {
    /// Append to `path`, creating parent directories as needed.
    pub fn open(name: &'static str, path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(name, Box::new(file)))
    }

    /// Memory-only trail (tests, probes).
    pub fn in_memory(name: &'static str) -> Self {
        Self::from_writer(name, Box::new(io::sink()))
    }

    pub fn from_writer(name: &'static str, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name,
            writer: Mutex::new(writer),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAP)),
            total: AtomicU64::new(0),
        }
    }

    pub fn record(&self, rec: T) {
        rec.trace();
        if let Err(e) = self.append_line(&rec) {
            error!(target: "audit", trail = self.name, "audit write failed: {e:#}");
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut q = lock(&self.recent);
        if q.len() >= RECENT_CAP {
            q.pop_front();
        }
        q.push_back(rec);
    }

    fn append_line(&self, rec: &T) -> io::Result<()> {
        let mut line = serde_json::to_string(rec).map_err(io::Error::other)?;
        line.push('\n');
        let mut w = lock(&self.writer);
        w.write_all(line.as_bytes())?;
        w.flush()
    }

    /// Up to `n` most recent records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let q = lock(&self.recent);
        let start = q.len().saturating_sub(n);
        q.iter().skip(start).cloned().collect()
    }

    /// Records appended since start (not capped).
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------
// Security events
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RateLimited,
    InjectionDetected,
    InvalidOutput,
    MatcherError,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::RateLimited => "rate_limited",
            SecurityEventKind::InjectionDetected => "injection_detected",
            SecurityEventKind::InvalidOutput => "invalid_output",
            SecurityEventKind::MatcherError => "matcher_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

impl AuditRecord for SecurityEvent {
    fn trace(&self) {
        warn!(
            target: "security",
            kind = self.kind.as_str(),
            user = %self.user_id,
            detail = %self.detail,
            "security event"
        );
    }
}

pub type SecurityLog = AuditTrail<SecurityEvent>;

// ---------------------------------------------------------------------
// Support events
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportAction {
    AutoResponded,
    PartialHint,
    Ignored,
    TeamFirst,
    DispatchFailed,
    FeedbackReceived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserFeedback {
    ThumbsUp,
    ThumbsDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportEvent {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub user_id: String,
    pub question: String,
    pub matched_faq_id: Option<String>,
    pub confidence: f64,
    pub method: Option<MatchMethod>,
    pub action: SupportAction,
    pub user_feedback: Option<UserFeedback>,
    pub escalated: bool,
}

impl SupportEvent {
    pub fn new(
        action: SupportAction,
        user: impl Into<String>,
        user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            user: user.into(),
            user_id: user_id.into(),
            question: String::new(),
            matched_faq_id: None,
            confidence: 0.0,
            method: None,
            action,
            user_feedback: None,
            escalated: false,
        }
    }

    pub fn with_question(mut self, question: &str) -> Self {
        self.question = truncate_chars(question, QUESTION_MAX_CHARS);
        self
    }

    /// Confidence is rounded to two decimals.
    pub fn with_match(mut self, m: &MatchResult) -> Self {
        self.matched_faq_id = m.faq_id.clone();
        self.confidence = (m.confidence * 100.0).round() / 100.0;
        self.method = Some(m.method);
        self
    }

    pub fn with_faq(mut self, faq_id: impl Into<String>) -> Self {
        self.matched_faq_id = Some(faq_id.into());
        self
    }

    pub fn with_feedback(mut self, feedback: UserFeedback, escalated: bool) -> Self {
        self.user_feedback = Some(feedback);
        self.escalated = escalated;
        self
    }
}

impl AuditRecord for SupportEvent {
    fn trace(&self) {
        info!(
            target: "triage",
            action = ?self.action,
            user = %self.user_id,
            faq = self.matched_faq_id.as_deref().unwrap_or("-"),
            confidence = self.confidence,
            escalated = self.escalated,
            "support event"
        );
    }
}

pub type SupportLog = AuditTrail<SupportEvent>;
