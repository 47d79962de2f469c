//! Metrics collection and exposition.
//!
//! # Metrics
//! - `link_requests_total` (counter): logical requests by method, outcome
//! - `link_request_duration_seconds` (histogram): end-to-end latency
//! - `link_retries_total` (counter): retries by failure class
//! - `link_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `link_connected` (gauge): 1=backend reachable, 0=unreachable
//! - `link_throttle_in_flight` / `link_throttle_queued` (gauges)
//! - `link_protocol_changes_total` (counter): fallbacks to plain transport
//! - `link_auth_attempts_total` (counter): login attempts by result
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - The Prometheus exporter serves its own scrape endpoint

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;

const REQUESTS_TOTAL: &str = "link_requests_total";
const REQUEST_DURATION_SECONDS: &str = "link_request_duration_seconds";
const RETRIES_TOTAL: &str = "link_retries_total";
const CIRCUIT_STATE: &str = "link_circuit_state";
const CONNECTED: &str = "link_connected";
const THROTTLE_IN_FLIGHT: &str = "link_throttle_in_flight";
const THROTTLE_QUEUED: &str = "link_throttle_queued";
const PROTOCOL_CHANGES_TOTAL: &str = "link_protocol_changes_total";
const AUTH_ATTEMPTS_TOTAL: &str = "link_auth_attempts_total";

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, outcome: &str, elapsed: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(reason: &'static str) {
    counter!(RETRIES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_circuit_state(state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!(CIRCUIT_STATE).set(value);
}

pub fn record_connected(connected: bool) {
    gauge!(CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

pub fn record_throttle(in_flight: usize, queued: usize) {
    gauge!(THROTTLE_IN_FLIGHT).set(in_flight as f64);
    gauge!(THROTTLE_QUEUED).set(queued as f64);
}

pub fn record_protocol_change() {
    counter!(PROTOCOL_CHANGES_TOTAL).increment(1);
}

pub fn record_auth_attempt(result: &'static str) {
    counter!(AUTH_ATTEMPTS_TOTAL, "result" => result).increment(1);
}
