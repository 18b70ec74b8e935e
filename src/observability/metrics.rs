//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_http_requests_total` (counter): inbound requests by method, status
//! - `bridge_http_request_duration_seconds` (histogram): inbound latency
//! - `bridge_downstream_requests_total` (counter): HikCentral calls by operation, outcome
//! - `bridge_downstream_duration_seconds` (histogram): HikCentral latency by operation
//! - `bridge_circuit_rejections_total` (counter): calls refused by the open circuit
//! - `bridge_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `bridge_registry_active_residents` (gauge): active resident mappings
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Prometheus exposition runs on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one inbound HTTP request.
pub fn record_http_request(method: &str, status: u16, start: Instant) {
    counter!(
        "bridge_http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("bridge_http_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record one HikCentral call.
pub fn record_downstream_request(operation: &str, outcome: &'static str, start: Instant) {
    counter!(
        "bridge_downstream_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("bridge_downstream_duration_seconds", "operation" => operation.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record a call refused by the open circuit.
pub fn record_circuit_rejection() {
    counter!("bridge_circuit_rejections_total").increment(1);
}

/// Record the state the circuit just moved to.
pub fn record_circuit_state(state: CircuitState) {
    gauge!("bridge_circuit_state").set(state.gauge_value());
}

pub fn record_registry_size(active: usize) {
    gauge!("bridge_registry_active_residents").set(active as f64);
}
