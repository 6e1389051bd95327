// tests/scheduler_race.rs
//
// Cancellation racing the dispatch timer on a multi-threaded runtime: every
// scheduled response must end in exactly one terminal state, and the sink
// must see exactly the dispatched ones.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use support_triage::dispatch::{
    DispatchScheduler, DispatchState, OutboundMessage, PendingResponse, ResponseSink,
};
use support_triage::matching::MatchMethod;

#[derive(Default)]
struct CountingSink {
    sent: AtomicUsize,
}

#[async_trait]
impl ResponseSink for CountingSink {
    async fn send(&self, _message: &OutboundMessage) -> anyhow::Result<Option<String>> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

fn pending(id: String) -> PendingResponse {
    let now = Utc::now();
    PendingResponse {
        request_id: id,
        target_channel: "support".into(),
        user_id: "u1".into(),
        username: "ana".into(),
        question: "q".into(),
        faq_id: "webhook_signature".into(),
        confidence: 0.9,
        method: MatchMethod::Semantic,
        answer_text: "a".into(),
        doc_link: None,
        scheduled_at: now,
        dispatch_at: now,
        cancelled: false,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_at_the_dispatch_instant_settles_exactly_once() {
    let sink = Arc::new(CountingSink::default());
    let scheduler = DispatchScheduler::new(Duration::from_millis(5), sink.clone());

    let mut handles = Vec::new();
    let mut cancels = Vec::new();
    for i in 0..200 {
        let id = format!("r{i}");
        let scheduled = scheduler.schedule(pending(id.clone())).expect("schedule");
        handles.push(scheduled.handle);

        let s = scheduler.clone();
        cancels.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            s.cancel(&id)
        }));
    }

    let mut cancelled_by_caller = 0;
    for c in cancels {
        if c.await.expect("cancel task") {
            cancelled_by_caller += 1;
        }
    }

    let mut dispatched = 0;
    let mut cancelled = 0;
    for h in handles {
        match h.await.expect("dispatch task").state {
            DispatchState::Dispatched => dispatched += 1,
            DispatchState::Cancelled => cancelled += 1,
            DispatchState::Failed => panic!("sink never fails"),
        }
    }

    assert_eq!(dispatched + cancelled, 200);
    assert_eq!(cancelled, cancelled_by_caller);
    assert_eq!(sink.sent.load(Ordering::SeqCst), dispatched);
    assert!(scheduler.pending().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_after_dispatch_is_a_no_op() {
    let sink = Arc::new(CountingSink::default());
    let scheduler = DispatchScheduler::new(Duration::ZERO, sink.clone());

    let report = scheduler
        .schedule(pending("r1".into()))
        .expect("schedule")
        .handle
        .await
        .expect("dispatch task");
    assert_eq!(report.state, DispatchState::Dispatched);
    assert!(!scheduler.cancel("r1"));
    assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
}
