//! Prometheus metrics exposed at `/metrics`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::OnceLock;
use tracing::error;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static TOOL_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_REQUESTS: OnceLock<IntGauge> = OnceLock::new();
static ORCHESTRATION_TIME: OnceLock<Histogram> = OnceLock::new();

pub fn init_metrics() {
    let req_counter = REQ_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("requests_total", "Total requests per route"),
            &["route", "status"],
        )
        .unwrap()
    });

    let tool_counter = TOOL_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("tool_invocations_total", "Capability invocations by tool and outcome"),
            &["tool", "outcome"],
        )
        .unwrap()
    });

    let active_requests = ACTIVE_REQUESTS.get_or_init(|| {
        IntGauge::new("active_requests", "Orchestrations currently in flight").unwrap()
    });

    let orchestration_time = ORCHESTRATION_TIME.get_or_init(|| {
        Histogram::with_opts(
            prometheus::HistogramOpts::new("orchestration_seconds", "Wall time of one orchestrated answer")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )
        .unwrap()
    });

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(tool_counter.clone())).ok();
    REGISTRY.register(Box::new(active_requests.clone())).ok();
    REGISTRY.register(Box::new(orchestration_time.clone())).ok();
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_tool_invocation(tool: &str, outcome: &str) {
    if let Some(counter) = TOOL_COUNTER.get() {
        counter.with_label_values(&[tool, outcome]).inc();
    }
}

#[cfg(test)]
pub(crate) fn tool_invocation_count(tool: &str, outcome: &str) -> u64 {
    TOOL_COUNTER
        .get()
        .map(|counter| counter.with_label_values(&[tool, outcome]).get())
        .unwrap_or(0)
}

/// Holds one unit of the active-requests gauge until dropped, so a request
/// abandoned mid-await still releases it.
pub struct ActiveRequestGuard {
    gauge: Option<IntGauge>,
}

impl ActiveRequestGuard {
    pub fn on(gauge: Option<&IntGauge>) -> Self {
        let gauge = gauge.cloned();
        if let Some(g) = &gauge {
            g.inc();
        }
        Self { gauge }
    }
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        if let Some(g) = &self.gauge {
            g.dec();
        }
    }
}

pub fn track_active() -> ActiveRequestGuard {
    ActiveRequestGuard::on(ACTIVE_REQUESTS.get())
}

pub fn observe_orchestration(seconds: f64) {
    if let Some(histogram) = ORCHESTRATION_TIME.get() {
        histogram.observe(seconds);
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, [("content-type", "text/plain")], Vec::new());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
