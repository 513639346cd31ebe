//! Metrics collection and exposition.
//!
//! # Metrics
//! - `session_tracker_invocations_total` (counter): invocations by status code
//! - `session_tracker_invocation_duration_seconds` (histogram): end-to-end latency
//! - `session_tracker_records_total` (counter): records by outcome
//! - `session_tracker_cache_ops_total` (counter): cache commands by op, result
//! - `session_tracker_cache_op_duration_seconds` (histogram): cache latency by op
//! - `session_tracker_cache_node_healthy` (gauge): 1=healthy, 0=unhealthy

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::cache::CacheError;

/// Start the Prometheus scrape endpoint and install the global recorder.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_invocation(status: u16, start: Instant) {
    counter!("session_tracker_invocations_total", "status" => status.to_string()).increment(1);
    histogram!("session_tracker_invocation_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_records(outcome: &'static str, count: usize) {
    if count > 0 {
        counter!("session_tracker_records_total", "outcome" => outcome).increment(count as u64);
    }
}

pub fn record_cache_op<T>(op: &'static str, result: &Result<T, CacheError>, start: Instant) {
    let result = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    counter!("session_tracker_cache_ops_total", "op" => op, "result" => result).increment(1);
    histogram!("session_tracker_cache_op_duration_seconds", "op" => op)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_node_health(node: &str, healthy: bool) {
    gauge!("session_tracker_cache_node_healthy", "node" => node.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
