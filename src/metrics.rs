use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe the triage series.
    /// Fails if a recorder is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        describe_counter!(
            "triage_requests_total",
            "Triaged requests by matching route (semantic or keyword)."
        );
        describe_counter!(
            "triage_outcomes_total",
            "Terminal outcomes by action."
        );
        describe_counter!(
            "triage_downgrades_total",
            "Requests sent to the keyword path, by reason."
        );
        describe_counter!("dispatch_total", "Scheduled answers by terminal state.");
        describe_histogram!(
            "classifier_latency_ms",
            Unit::Milliseconds,
            "Latency of successful classifier calls."
        );

        Ok(Self { handle })
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
