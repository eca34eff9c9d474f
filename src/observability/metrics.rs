//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define server metrics (requests, latency, bridge outcomes, broker sessions)
//! - Expose a Prometheus-compatible `/prometheus` endpoint
//!
//! # Metrics
//! - `switchyard_http_requests_total` (counter): requests by method, status
//! - `switchyard_http_request_duration_seconds` (histogram): latency distribution
//! - `switchyard_bridge_requests_total` (counter): bridged calls by channel, outcome
//! - `switchyard_broker_sessions` (gauge): open broker connections
//! - `switchyard_subsystem_up` (gauge): 1=up, 0=down, by subsystem
//!
//! # Design Decisions
//! - The Prometheus recorder is installed once per process; later servers
//!   in the same process share it
//! - Each serving server runs recorder upkeep (histogram bucket draining)
//!   on a fixed interval until it stops

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::ShutdownSignal;
use crate::routing::RouteHandler;

/// Path the metrics endpoint is mounted on.
pub const METRICS_PATH: &str = "/prometheus";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder (first call only) and return its handle.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("A metrics recorder is already installed; /prometheus will be empty");
            }
            handle
        })
        .clone()
}

/// Run recorder upkeep every few seconds until `stop` fires.
pub fn spawn_upkeep(handle: PrometheusHandle, mut stop: ShutdownSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => handle.run_upkeep(),
                _ = stop.recv() => break,
            }
        }
        tracing::debug!("Metrics upkeep stopped");
    })
}

/// Route handler rendering the current snapshot in text exposition format.
pub fn metrics_handler(handle: PrometheusHandle) -> RouteHandler {
    RouteHandler::new(move |_request| {
        let body = handle.render();
        async move { ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response() }
    })
}

/// Record a completed HTTP request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    metrics::counter!(
        "switchyard_http_requests_total",
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        "switchyard_http_request_duration_seconds",
        "method" => method.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record the outcome of a bridged request (`ok`, `error`, `timeout`, ...).
pub fn record_bridge_request(channel: &str, outcome: &'static str) {
    metrics::counter!(
        "switchyard_bridge_requests_total",
        "channel" => channel.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record the number of open broker sessions.
pub fn record_broker_sessions(count: u64) {
    metrics::gauge!("switchyard_broker_sessions").set(count as f64);
}

/// Record a subsystem availability transition.
pub fn record_subsystem_up(subsystem: &'static str, up: bool) {
    metrics::gauge!("switchyard_subsystem_up", "subsystem" => subsystem)
        .set(if up { 1.0 } else { 0.0 });
}
