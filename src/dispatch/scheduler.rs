//! Dispatch scheduler: holds full answers for a fixed delay so a human can
//! answer first.
//!
//! Every scheduled response lives in a slot map keyed by request id and has
//! one timer task. A response reaches exactly one terminal state:
//! dispatched, failed, or cancelled. Whoever removes the slot from the map
//! (under the map lock) owns that transition; the timer task only sends
//! after it has removed the slot itself, so a cancellation that arrives in
//! the same instant either wins completely or is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::sink::{DynSink, OutboundMessage};
use crate::matching::MatchMethod;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingResponse {
    pub request_id: String,
    pub target_channel: String,
    pub user_id: String,
    pub username: String,
    pub question: String,
    pub faq_id: String,
    pub confidence: f64,
    pub method: MatchMethod,
    pub answer_text: String,
    pub doc_link: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub dispatch_at: DateTime<Utc>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Dispatched,
    Failed,
    Cancelled,
}

impl DispatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchState::Dispatched => "dispatched",
            DispatchState::Failed => "failed",
            DispatchState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub response: PendingResponse,
    pub state: DispatchState,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("request `{0}` already has a pending response")]
    AlreadyPending(String),
    #[error("scheduler is shut down")]
    Closed,
}

/// Handle for one scheduled response.
#[derive(Debug)]
pub struct ScheduledDispatch {
    pub dispatch_at: DateTime<Utc>,
    pub handle: JoinHandle<DispatchReport>,
}

/// Notified once per scheduled response, after its terminal transition.
pub trait DispatchObserver: Send + Sync {
    fn on_settled(&self, report: &DispatchReport);
}

struct Slot {
    response: PendingResponse,
    cancel: oneshot::Sender<()>,
}

struct Inner {
    delay: Duration,
    sink: DynSink,
    observer: Option<Arc<dyn DispatchObserver>>,
    slots: Mutex<HashMap<String, Slot>>,
    closed: AtomicBool,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        match self.slots.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run(
        self: Arc<Self>,
        mut response: PendingResponse,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> DispatchReport {
        tokio::select! {
            biased;
            _ = &mut cancel_rx => {}
            _ = tokio::time::sleep(self.delay) => {}
        }

        let owned = self.slots().remove(&response.request_id).is_some();
        let report = if owned {
            self.deliver(response).await
        } else {
            response.cancelled = true;
            DispatchReport {
                response,
                state: DispatchState::Cancelled,
                message_id: None,
                error: None,
            }
        };

        counter!("dispatch_total", "result" => report.state.as_str()).increment(1);
        if let Some(observer) = &self.observer {
            observer.on_settled(&report);
        }
        report
    }

    async fn deliver(&self, response: PendingResponse) -> DispatchReport {
        let message = OutboundMessage::FullAnswer {
            channel_id: response.target_channel.clone(),
            reply_to: response.request_id.clone(),
            text: response.answer_text.clone(),
            link: response.doc_link.clone(),
        };
        match self.sink.send(&message).await {
            Ok(message_id) => {
                info!(
                    target: "dispatch",
                    request = %response.request_id,
                    faq = %response.faq_id,
                    sink = self.sink.name(),
                    "answer dispatched"
                );
                DispatchReport {
                    response,
                    state: DispatchState::Dispatched,
                    message_id,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    target: "dispatch",
                    request = %response.request_id,
                    sink = self.sink.name(),
                    "dispatch failed: {e:#}"
                );
                DispatchReport {
                    response,
                    state: DispatchState::Failed,
                    message_id: None,
                    error: Some(format!("{e:#}")),
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct DispatchScheduler {
    inner: Arc<Inner>,
}

impl DispatchScheduler {
    pub fn new(delay: Duration, sink: DynSink) -> Self {
        Self::build(delay, sink, None)
    }

    pub fn with_observer(
        delay: Duration,
        sink: DynSink,
        observer: Arc<dyn DispatchObserver>,
    ) -> Self {
        Self::build(delay, sink, Some(observer))
    }

    fn build(delay: Duration, sink: DynSink, observer: Option<Arc<dyn DispatchObserver>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                delay,
                sink,
                observer,
                slots: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Schedule `response`. The timer starts now, so `dispatch_at` is the
    /// current time plus the delay; `scheduled_at` keeps the gateway's
    /// timestamp and only orders staff replies against the request.
    /// Must be called from within a Tokio runtime.
    pub fn schedule(
        &self,
        mut response: PendingResponse,
    ) -> Result<ScheduledDispatch, ScheduleError> {
        let delay = chrono::Duration::from_std(self.inner.delay).unwrap_or(chrono::Duration::MAX);
        let armed_at = Utc::now();
        response.dispatch_at = armed_at.checked_add_signed(delay).unwrap_or(armed_at);
        response.cancelled = false;

        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.inner.slots();
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(ScheduleError::Closed);
            }
            if slots.contains_key(&response.request_id) {
                return Err(ScheduleError::AlreadyPending(response.request_id));
            }
            slots.insert(
                response.request_id.clone(),
                Slot {
                    response: response.clone(),
                    cancel: tx,
                },
            );
        }

        info!(
            target: "dispatch",
            request = %response.request_id,
            faq = %response.faq_id,
            dispatch_at = %response.dispatch_at,
            "answer scheduled"
        );
        let dispatch_at = response.dispatch_at;
        let handle = tokio::spawn(self.inner.clone().run(response, rx));
        Ok(ScheduledDispatch {
            dispatch_at,
            handle,
        })
    }

    /// Cancel one pending response. Returns `false` if it already settled.
    pub fn cancel(&self, request_id: &str) -> bool {
        let slot = self.inner.slots().remove(request_id);
        match slot {
            Some(slot) => {
                let _ = slot.cancel.send(());
                true
            }
            None => false,
        }
    }

    /// A human replied in `channel_id` at `human_at`: cancel every response
    /// for that channel scheduled at or before that instant.
    pub fn cancel_for_channel(&self, channel_id: &str, human_at: DateTime<Utc>) -> Vec<String> {
        let mut slots = self.inner.slots();
        let ids: Vec<String> = slots
            .values()
            .filter(|s| s.response.target_channel == channel_id && s.response.scheduled_at <= human_at)
            .map(|s| s.response.request_id.clone())
            .collect();
        for id in &ids {
            if let Some(slot) = slots.remove(id) {
                let _ = slot.cancel.send(());
            }
        }
        drop(slots);
        if !ids.is_empty() {
            info!(
                target: "dispatch",
                channel = %channel_id,
                cancelled = ids.len(),
                "human replied first"
            );
        }
        ids
    }

    /// Still-pending responses, earliest dispatch first.
    pub fn pending(&self) -> Vec<PendingResponse> {
        let mut out: Vec<PendingResponse> = self
            .inner
            .slots()
            .values()
            .map(|s| s.response.clone())
            .collect();
        out.sort_by(|a, b| {
            a.dispatch_at
                .cmp(&b.dispatch_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        out
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.inner.slots().contains_key(request_id)
    }

    /// Refuse new work and cancel everything pending.
    pub fn shutdown(&self) -> usize {
        let mut slots = self.inner.slots();
        self.inner.closed.store(true, Ordering::SeqCst);
        let n = slots.len();
        for (_, slot) in slots.drain() {
            let _ = slot.cancel.send(());
        }
        n
    }
}
