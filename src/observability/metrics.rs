//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (connections, rejections, bytes, registry size)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `bridge_proxy_connections_accepted_total` (counter): by module
//! - `bridge_proxy_connections_closed_total` (counter)
//! - `bridge_proxy_bad_requests_total` (counter): 400 responses by reason
//! - `bridge_proxy_relayed_bytes_total` (counter): by direction (upstream/downstream)
//! - `bridge_proxy_registry_entries` (gauge): live bridge-service entries
//! - `bridge_proxy_registry_evictions_total` (counter): idle entries swept
//!
//! Without an installed recorder every call is a no-op.

use ::metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_accepted(module: &str) {
    counter!("bridge_proxy_connections_accepted_total", "module" => module.to_string()).increment(1);
}

pub fn record_connection_closed() {
    counter!("bridge_proxy_connections_closed_total").increment(1);
}

pub fn record_bad_request(reason: &'static str) {
    counter!("bridge_proxy_bad_requests_total", "reason" => reason).increment(1);
}

pub fn record_relayed_bytes(direction: &'static str, bytes: u64) {
    counter!("bridge_proxy_relayed_bytes_total", "direction" => direction).increment(bytes);
}

pub fn set_registry_entries(count: usize) {
    gauge!("bridge_proxy_registry_entries").set(count as f64);
}

pub fn record_registry_evictions(count: usize) {
    counter!("bridge_proxy_registry_evictions_total").increment(count as u64);
}
