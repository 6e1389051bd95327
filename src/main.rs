//! Support triage service: binary entrypoint.
//! Boots the Axum HTTP server through Shuttle, wiring the triage pipeline,
//! the gateway routes and the Prometheus endpoint.

use shuttle_axum::ShuttleAxum;
use support_triage::api::{create_router, AppState};
use support_triage::config::{DEFAULT_LOG_FILTER, ENV_LOG_FORMAT};
use support_triage::metrics::Metrics;
use support_triage::TriageRuntime;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    // The runtime may already have installed a subscriber; keep it if so.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let runtime = TriageRuntime::from_env()?;
    let mut router = create_router(AppState {
        triage: runtime.triage.clone(),
    });

    match Metrics::init() {
        Ok(metrics) => router = router.merge(metrics.router()),
        Err(e) => warn!("metrics disabled: {e:#}"),
    }

    Ok(router.into())
}
