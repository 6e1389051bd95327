// src/lib.rs
// Public library surface for the service binary, the probe CLI and integration tests.

pub mod api;
pub mod audit;
pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod feedback;
pub mod gate;
pub mod intake;
pub mod knowledge;
pub mod matching;
pub mod metrics;
pub mod pipeline;
pub mod policy;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::bootstrap::TriageRuntime;
pub use crate::pipeline::{Outcome, ReactionEvent, Triage, TriageDeps, TriageOptions};
