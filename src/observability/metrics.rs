//! Metrics collection and exposition.
//!
//! # Metrics
//! - `graph_balancer_dispatch_total` (counter): dispatches by endpoint, outcome
//! - `graph_balancer_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `graph_balancer_health_probe_total` (counter): monitor probes by endpoint, outcome
//! - `graph_balancer_rotation_size` (gauge): backends currently in rotation
//!
//! All recorders are no-ops until an exporter is installed.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_dispatch(endpoint: &str, outcome: &'static str) {
    metrics::counter!(
        "graph_balancer_dispatch_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_backend_health(endpoint: &str, healthy: bool) {
    metrics::gauge!("graph_balancer_backend_health", "endpoint" => endpoint.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_probe(endpoint: &str, outcome: &'static str) {
    metrics::counter!(
        "graph_balancer_health_probe_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_rotation_size(size: usize) {
    metrics::gauge!("graph_balancer_rotation_size").set(size as f64);
}
