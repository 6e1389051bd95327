//! HTTP adapter for the chat gateway: message and reaction events in,
//! triage outcomes out, plus read-only debug views.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::audit::SecurityEvent;
use crate::dispatch::PendingResponse;
use crate::feedback::FeedbackOutcome;
use crate::intake::PlatformMessage;
use crate::pipeline::{Outcome, ReactionEvent, Triage};

const DEFAULT_SECURITY_LIMIT: usize = 50;
const MAX_SECURITY_LIMIT: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub triage: Arc<Triage>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/events/message", post(message_event))
        .route("/events/reaction", post(reaction_event))
        .route("/debug/pending", get(debug_pending))
        .route("/debug/security", get(debug_security))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn message_event(
    State(state): State<AppState>,
    Json(msg): Json<PlatformMessage>,
) -> Json<Outcome> {
    debug!(target: "api", message = %msg.message_id, channel = %msg.channel_id, "message event");
    Json(state.triage.handle_message(msg).await)
}

async fn reaction_event(
    State(state): State<AppState>,
    Json(ev): Json<ReactionEvent>,
) -> Json<FeedbackOutcome> {
    debug!(target: "api", message = %ev.message_id, "reaction event");
    Json(state.triage.handle_reaction(ev).await)
}

async fn debug_pending(State(state): State<AppState>) -> Json<Vec<PendingResponse>> {
    Json(state.triage.pending())
}

#[derive(serde::Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn debug_security(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<SecurityEvent>> {
    let n = q
        .limit
        .unwrap_or(DEFAULT_SECURITY_LIMIT)
        .min(MAX_SECURITY_LIMIT);
    Json(state.triage.security_log().recent(n))
}
