//! # Triage pipeline
//! One support request in, exactly one outcome out.
//!
//! sanitize → gate chain (rate limit, injection) → semantic matcher →
//! validator → confidence policy → scheduled answer | immediate hint | ignore.
//! Any gate downgrade, classifier failure or rejected classifier output sends
//! the request down the keyword path instead; the user never sees the
//! difference beyond the answer itself.
//!
//! Rate-limit admission and duplicate detection happen before the first
//! `.await`, so a user's requests are admitted in arrival order.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{
    fingerprint, SecurityEvent, SecurityLog, SupportAction, SupportEvent, SupportLog, UserFeedback,
};
use crate::config::ai::{DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_TIMEOUT_SECS};
use crate::config::{ConfigError, Settings, DEFAULT_RESPONSE_DELAY_SECS};
use crate::dispatch::{
    DispatchObserver, DispatchReport, DispatchScheduler, DispatchState, DynSink, OutboundMessage,
    PendingResponse,
};
use crate::feedback::{FeedbackOutcome, FeedbackTicket, FeedbackTracker, Reaction};
use crate::gate::rate_limit::{DEFAULT_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_WINDOW_SECS};
use crate::gate::sanitize::{truncate_chars, DEFAULT_MAX_MESSAGE_LENGTH};
use crate::gate::{
    Downgrade, GateChain, GateInput, InjectionDetector, RateLimitParams, RateLimiter, Sanitizer,
};
use crate::intake::{IncomingRequest, Intake, IntakeFilter, PlatformMessage, SkipReason};
use crate::knowledge::KnowledgeBase;
use crate::matching::classifier::ClassifierError;
use crate::matching::{
    match_keywords, validate, DynClassifier, MatchMethod, MatchResult, SemanticMatcher,
};
use crate::policy::{Action, ConfidencePolicy};

const RECENT_IDS_CAP: usize = 4096;
const LOGGED_QUESTION_CHARS: usize = 200;

/// Tunables for one `Triage` instance.
#[derive(Debug, Clone)]
pub struct TriageOptions {
    pub max_message_length: usize,
    pub rate_limit: RateLimitParams,
    pub policy: ConfidencePolicy,
    pub response_delay: Duration,
    pub classifier_timeout: Duration,
    pub max_context_chars: usize,
    pub support_channel_id: String,
    pub team_usernames: Vec<String>,
}

impl Default for TriageOptions {
    fn default() -> Self {
        Self {
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            rate_limit: RateLimitParams {
                max_requests: DEFAULT_RATE_LIMIT_REQUESTS,
                window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            },
            policy: ConfidencePolicy::default(),
            response_delay: Duration::from_secs(DEFAULT_RESPONSE_DELAY_SECS),
            classifier_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            support_channel_id: "support".to_string(),
            team_usernames: Vec::new(),
        }
    }
}

impl TriageOptions {
    pub fn from_settings(s: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            max_message_length: s.max_message_length,
            rate_limit: RateLimitParams {
                max_requests: s.rate_limit_requests,
                window_secs: s.rate_limit_window_secs,
            },
            policy: s.policy()?,
            response_delay: Duration::from_secs(s.response_delay_secs),
            classifier_timeout: s.classifier.timeout,
            max_context_chars: s.classifier.max_context_chars,
            support_channel_id: s.support_channel_id.clone(),
            team_usernames: s.team_usernames.clone(),
        })
    }
}

/// Collaborators injected into `Triage`.
pub struct TriageDeps {
    pub knowledge: Arc<KnowledgeBase>,
    pub detector: InjectionDetector,
    pub classifier: DynClassifier,
    pub sink: DynSink,
    pub security: Arc<SecurityLog>,
    pub support: Arc<SupportLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageDecision {
    pub request_id: String,
    pub faq_id: Option<String>,
    pub confidence: f64,
    pub method: MatchMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade: Option<Downgrade>,
}

/// Terminal result of handling one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Scheduled {
        decision: TriageDecision,
        dispatch_at: DateTime<Utc>,
    },
    Hinted {
        decision: TriageDecision,
    },
    Ignored {
        decision: TriageDecision,
    },
    Errored {
        request_id: String,
        detail: String,
    },
    Duplicate {
        request_id: String,
    },
    StaffReply {
        channel_id: String,
        cancelled: Vec<String>,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Scheduled { .. } => "scheduled",
            Outcome::Hinted { .. } => "hinted",
            Outcome::Ignored { .. } => "ignored",
            Outcome::Errored { .. } => "errored",
            Outcome::Duplicate { .. } => "duplicate",
            Outcome::StaffReply { .. } => "staff_reply",
            Outcome::Skipped { .. } => "skipped",
        }
    }

    pub fn decision(&self) -> Option<&TriageDecision> {
        match self {
            Outcome::Scheduled { decision, .. }
            | Outcome::Hinted { decision }
            | Outcome::Ignored { decision } => Some(decision),
            _ => None,
        }
    }
}

/// Reaction event from the chat gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

#[derive(Default)]
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    /// `false` if `id` was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > RECENT_IDS_CAP {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

/// Logs the terminal state of every scheduled answer and opens a feedback
/// ticket for the ones that were delivered.
struct SettlementRecorder {
    support: Arc<SupportLog>,
    feedback: Arc<FeedbackTracker>,
}

impl DispatchObserver for SettlementRecorder {
    fn on_settled(&self, report: &DispatchReport) {
        let r = &report.response;
        let action = match report.state {
            DispatchState::Dispatched => SupportAction::AutoResponded,
            DispatchState::Failed => SupportAction::DispatchFailed,
            DispatchState::Cancelled => SupportAction::TeamFirst,
        };
        let m = MatchResult {
            faq_id: Some(r.faq_id.clone()),
            confidence: r.confidence,
            method: r.method,
            reasoning: None,
        };
        self.support.record(
            SupportEvent::new(action, &r.username, &r.user_id, Utc::now())
                .with_question(&r.question)
                .with_match(&m),
        );

        if report.state == DispatchState::Dispatched {
            let key = report
                .message_id
                .clone()
                .unwrap_or_else(|| r.request_id.clone());
            self.feedback.register(
                key,
                FeedbackTicket {
                    request_id: r.request_id.clone(),
                    channel_id: r.target_channel.clone(),
                    faq_id: r.faq_id.clone(),
                    user_id: r.user_id.clone(),
                    username: r.username.clone(),
                    question: r.question.clone(),
                },
            );
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct Triage {
    knowledge: Arc<KnowledgeBase>,
    sanitizer: Sanitizer,
    gates: GateChain,
    semantic: SemanticMatcher,
    policy: ConfidencePolicy,
    intake: IntakeFilter,
    scheduler: DispatchScheduler,
    sink: DynSink,
    feedback: Arc<FeedbackTracker>,
    security: Arc<SecurityLog>,
    support: Arc<SupportLog>,
    recent: Mutex<RecentIds>,
}

impl Triage {
    pub fn new(options: TriageOptions, deps: TriageDeps) -> Self {
        let feedback = Arc::new(FeedbackTracker::new());
        let recorder = Arc::new(SettlementRecorder {
            support: deps.support.clone(),
            feedback: feedback.clone(),
        });
        let scheduler =
            DispatchScheduler::with_observer(options.response_delay, deps.sink.clone(), recorder);

        // Rate limit first: an over-cap user never reaches the pattern scan.
        let gates = GateChain::new()
            .with_stage(Arc::new(RateLimiter::new(options.rate_limit.clone())))
            .with_stage(Arc::new(deps.detector));

        Self {
            sanitizer: Sanitizer::new(options.max_message_length),
            semantic: SemanticMatcher::new(
                deps.classifier,
                options.classifier_timeout,
                options.max_context_chars,
            ),
            policy: options.policy,
            intake: IntakeFilter::new(options.support_channel_id, &options.team_usernames),
            knowledge: deps.knowledge,
            gates,
            scheduler,
            sink: deps.sink,
            feedback,
            security: deps.security,
            support: deps.support,
            recent: Mutex::new(RecentIds::default()),
        }
    }

    /// Entry point for raw platform messages.
    pub async fn handle_message(&self, msg: PlatformMessage) -> Outcome {
        match self.intake.classify(msg, &self.knowledge, Utc::now()) {
            Intake::Triage(request) => self.triage(request).await,
            Intake::StaffReply { channel_id, at } => self.staff_replied(&channel_id, at),
            Intake::Skip(reason) => {
                debug!(target: "triage", reason = ?reason, "message skipped");
                Outcome::Skipped { reason }
            }
        }
    }

    /// Run one support request through the decision pipeline.
    pub async fn triage(&self, request: IncomingRequest) -> Outcome {
        if !lock(&self.recent).insert(&request.request_id) {
            debug!(target: "triage", request = %request.request_id, "duplicate delivery");
            counter!("triage_outcomes_total", "action" => "duplicate").increment(1);
            return Outcome::Duplicate {
                request_id: request.request_id,
            };
        }

        let clean = self.sanitizer.sanitize(&request.raw_text);
        let gate = self.gates.evaluate(&GateInput {
            user_id: &request.user_id,
            text: &clean,
            now: request.timestamp,
        });

        let (result, downgrade) = match gate {
            Some(d) => (self.fallback(&request, &clean, &d, true), Some(d)),
            None => self.match_semantic_or_fallback(&request, &clean).await,
        };
        counter!("triage_requests_total", "route" => result.method.as_str()).increment(1);

        let action = self.policy.decide(&result);
        info!(
            target: "triage",
            request = %request.request_id,
            text_id = %fingerprint(&clean),
            route = result.method.as_str(),
            faq = result.faq_id.as_deref().unwrap_or("-"),
            confidence = result.confidence,
            action = action.label(),
            "request triaged"
        );

        let decision = TriageDecision {
            request_id: request.request_id.clone(),
            faq_id: result.faq_id.clone(),
            confidence: result.confidence,
            method: result.method,
            downgrade,
        };
        let outcome = match action {
            Action::Answer(faq_id) => self.schedule_answer(&request, &clean, &result, &faq_id, decision),
            Action::Hint(faq_id) => self.send_hint(&request, &clean, &result, &faq_id, decision).await,
            Action::Ignore => {
                self.support.record(
                    SupportEvent::new(
                        SupportAction::Ignored,
                        &request.username,
                        &request.user_id,
                        request.timestamp,
                    )
                    .with_question(&clean)
                    .with_match(&result),
                );
                Outcome::Ignored { decision }
            }
        };
        counter!("triage_outcomes_total", "action" => outcome.label()).increment(1);
        outcome
    }

    async fn match_semantic_or_fallback(
        &self,
        request: &IncomingRequest,
        clean: &str,
    ) -> (MatchResult, Option<Downgrade>) {
        match self.semantic.match_semantic(clean, &self.knowledge).await {
            Ok(claim) => match validate(claim, &self.knowledge) {
                Ok(m) => (m, None),
                Err(rejection) => {
                    let d = Downgrade::InvalidOutput {
                        detail: rejection.to_string(),
                    };
                    (self.fallback(request, clean, &d, true), Some(d))
                }
            },
            Err(e) => {
                // A disabled classifier is configuration, not an incident.
                let audit = !matches!(e, ClassifierError::Disabled);
                if !audit {
                    debug!(
                        target: "security",
                        request_id = %request.request_id,
                        "classifier disabled; keyword path without matcher_error"
                    );
                }
                let d = Downgrade::ClassifierFailed {
                    detail: e.to_string(),
                };
                (self.fallback(request, clean, &d, audit), Some(d))
            }
        }
    }

    fn fallback(
        &self,
        request: &IncomingRequest,
        clean: &str,
        downgrade: &Downgrade,
        audit: bool,
    ) -> MatchResult {
        counter!("triage_downgrades_total", "reason" => downgrade.label()).increment(1);
        if audit {
            self.security.record(SecurityEvent {
                kind: downgrade.security_kind(),
                user_id: request.user_id.clone(),
                timestamp: request.timestamp,
                detail: downgrade.detail(),
            });
        }
        match_keywords(clean, &self.knowledge)
    }

    fn schedule_answer(
        &self,
        request: &IncomingRequest,
        clean: &str,
        result: &MatchResult,
        faq_id: &str,
        decision: TriageDecision,
    ) -> Outcome {
        let Some(entry) = self.knowledge.get(faq_id) else {
            return self.errored(request, format!("unknown faq `{faq_id}`"));
        };
        let pending = PendingResponse {
            request_id: request.request_id.clone(),
            target_channel: request.channel_id.clone(),
            user_id: request.user_id.clone(),
            username: request.username.clone(),
            question: truncate_chars(clean, LOGGED_QUESTION_CHARS),
            faq_id: faq_id.to_string(),
            confidence: result.confidence,
            method: result.method,
            answer_text: entry.answer.clone(),
            doc_link: entry.doc_link.clone(),
            scheduled_at: request.timestamp,
            dispatch_at: request.timestamp,
            cancelled: false,
        };
        match self.scheduler.schedule(pending) {
            Ok(scheduled) => Outcome::Scheduled {
                decision,
                dispatch_at: scheduled.dispatch_at,
            },
            Err(e) => self.errored(request, e.to_string()),
        }
    }

    async fn send_hint(
        &self,
        request: &IncomingRequest,
        clean: &str,
        result: &MatchResult,
        faq_id: &str,
        decision: TriageDecision,
    ) -> Outcome {
        let Some(entry) = self.knowledge.get(faq_id) else {
            return self.errored(request, format!("unknown faq `{faq_id}`"));
        };
        let message = OutboundMessage::PartialHint {
            channel_id: request.channel_id.clone(),
            reply_to: request.request_id.clone(),
            topic: entry.topic().to_string(),
            link: entry.doc_link.clone(),
        };
        let action = match self.sink.send(&message).await {
            Ok(_) => SupportAction::PartialHint,
            Err(e) => {
                warn!(target: "dispatch", request = %request.request_id, "hint failed: {e:#}");
                SupportAction::DispatchFailed
            }
        };
        self.support.record(
            SupportEvent::new(action, &request.username, &request.user_id, request.timestamp)
                .with_question(clean)
                .with_match(result),
        );
        match action {
            SupportAction::PartialHint => Outcome::Hinted { decision },
            _ => Outcome::Errored {
                request_id: request.request_id.clone(),
                detail: "hint delivery failed".to_string(),
            },
        }
    }

    fn errored(&self, request: &IncomingRequest, detail: String) -> Outcome {
        warn!(target: "triage", request = %request.request_id, "request errored: {detail}");
        Outcome::Errored {
            request_id: request.request_id.clone(),
            detail,
        }
    }

    /// A team member posted in `channel_id` at `at`; cancel what they pre-empt.
    pub fn staff_replied(&self, channel_id: &str, at: DateTime<Utc>) -> Outcome {
        Outcome::StaffReply {
            channel_id: channel_id.to_string(),
            cancelled: self.scheduler.cancel_for_channel(channel_id, at),
        }
    }

    /// Apply a reaction to a delivered answer.
    pub async fn handle_reaction(&self, event: ReactionEvent) -> FeedbackOutcome {
        let reaction = Reaction::parse(&event.emoji);
        let Some(ticket) = self
            .feedback
            .take(&event.message_id, &event.user_id, reaction)
        else {
            return FeedbackOutcome::Ignored;
        };

        let base = SupportEvent::new(
            SupportAction::FeedbackReceived,
            &ticket.username,
            &ticket.user_id,
            Utc::now(),
        )
        .with_question(&ticket.question)
        .with_faq(&ticket.faq_id);

        if reaction == Reaction::ThumbsDown {
            let message = OutboundMessage::Escalation {
                channel_id: ticket.channel_id.clone(),
                reply_to: ticket.request_id.clone(),
            };
            let escalated = match self.sink.send(&message).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(target: "dispatch", request = %ticket.request_id, "escalation failed: {e:#}");
                    false
                }
            };
            self.support
                .record(base.with_feedback(UserFeedback::ThumbsDown, escalated));
            FeedbackOutcome::Escalated {
                faq_id: ticket.faq_id,
            }
        } else {
            self.support
                .record(base.with_feedback(UserFeedback::ThumbsUp, false));
            FeedbackOutcome::Helpful {
                faq_id: ticket.faq_id,
            }
        }
    }

    pub fn pending(&self) -> Vec<PendingResponse> {
        self.scheduler.pending()
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn security_log(&self) -> &SecurityLog {
        &self.security
    }

    pub fn support_log(&self) -> &SupportLog {
        &self.support
    }

    pub fn policy(&self) -> &ConfidencePolicy {
        &self.policy
    }

    pub fn provider_name(&self) -> &'static str {
        self.semantic.provider_name()
    }

    pub fn gate_stages(&self) -> Vec<&'static str> {
        self.gates.stage_names()
    }

    /// Cancel everything still pending; returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        self.scheduler.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LogSink;
    use crate::knowledge::KnowledgeEntry;
    use crate::matching::MockClassifier;
    use chrono::TimeZone;

    fn kb() -> Arc<KnowledgeBase> {
        Arc::new(
            KnowledgeBase::from_entries(vec![KnowledgeEntry::new(
                "webhooks",
                "How do I verify webhook signatures?",
                "Use the signing secret.",
            )
            .with_keywords(["webhook", "signature", "verify"])])
            .unwrap(),
        )
    }

    fn triage(classifier: MockClassifier) -> Triage {
        Triage::new(
            TriageOptions::default(),
            TriageDeps {
                knowledge: kb(),
                detector: InjectionDetector::with_defaults().unwrap(),
                classifier: Arc::new(classifier),
                sink: Arc::new(LogSink),
                security: Arc::new(SecurityLog::in_memory("security")),
                support: Arc::new(SupportLog::in_memory("support")),
            },
        )
    }

    fn request(id: &str, text: &str) -> IncomingRequest {
        IncomingRequest {
            request_id: id.into(),
            user_id: "u1".into(),
            username: "ana".into(),
            channel_id: "support".into(),
            raw_text: text.into(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn recent_ids_forget_the_oldest() {
        let mut r = RecentIds::default();
        assert!(r.insert("a"));
        assert!(!r.insert("a"));
        for i in 0..RECENT_IDS_CAP {
            r.insert(&i.to_string());
        }
        assert!(r.insert("a"));
    }

    #[tokio::test]
    async fn low_confidence_is_ignored_and_logged() {
        let t = triage(MockClassifier::claiming("webhooks", 0.1));
        let out = t.triage(request("r1", "webhook question")).await;
        assert_eq!(out.label(), "ignored");
        let ev = t.support_log().recent(1);
        assert_eq!(ev[0].action, SupportAction::Ignored);
        assert_eq!(ev[0].matched_faq_id.as_deref(), Some("webhooks"));
    }

    #[tokio::test]
    async fn disabled_classifier_falls_back_quietly() {
        let t = triage(MockClassifier::failing(ClassifierError::Disabled));
        let out = t
            .triage(request("r1", "how do I verify a webhook signature"))
            .await;
        let d = out.decision().unwrap();
        assert_eq!(d.method, MatchMethod::Keyword);
        assert!(matches!(d.downgrade, Some(Downgrade::ClassifierFailed { .. })));
        assert_eq!(t.security_log().total(), 0);
        t.shutdown();
    }

    #[test]
    fn gate_order_is_rate_limit_then_injection() {
        let t = triage(MockClassifier::no_match());
        assert_eq!(t.gate_stages(), vec!["rate_limit", "injection"]);
    }
}
