use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{opts, IntCounter, IntCounterVec, Registry, TextEncoder};

use crate::state::AppState;

/// Per-process counters, exported at `/metrics`
pub struct Metrics {
    registry: Registry,
    pub tickets_issued: IntCounter,
    pub runs_finished: IntCounterVec,
    pub scans: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let tickets_issued = IntCounter::with_opts(opts!(
            "turnstile_tickets_issued_total",
            "Ticket rows committed by issuance runs"
        ))?;
        let runs_finished = IntCounterVec::new(
            opts!("turnstile_runs_finished_total", "Issuance runs by final status"),
            &["status"],
        )?;
        let scans = IntCounterVec::new(opts!("turnstile_scans_total", "Scans by outcome"), &["outcome"])?;

        registry.register(Box::new(tickets_issued.clone()))?;
        registry.register(Box::new(runs_finished.clone()))?;
        registry.register(Box::new(scans.clone()))?;

        Ok(Self {
            registry,
            tickets_issued,
            runs_finished,
            scans,
        })
    }

    pub fn export(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export(),
    )
}
