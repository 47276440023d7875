//! Performance metrics collection
//!
//! This module provides functionality for collecting and exposing query
//! metrics in Prometheus format.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize the metrics collection system
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    // Create a Prometheus exporter
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

/// Record a single statement execution
pub fn record_query(kind: &'static str, duration_ms: f64) {
    counter!("reactivesql.query.executed", "kind" => kind).increment(1);
    histogram!("reactivesql.query.duration_ms", "kind" => kind).record(duration_ms);
}

/// Record a statement that failed, timed out or was cancelled
pub fn record_query_failure(kind: &'static str) {
    counter!("reactivesql.query.failed", "kind" => kind).increment(1);
}

/// Record a whole batch
pub fn record_batch(duration_ms: f64, queries: usize) {
    counter!("reactivesql.batch.executed").increment(1);
    histogram!("reactivesql.batch.duration_ms").record(duration_ms);
    histogram!("reactivesql.batch.queries").record(queries as f64);
}

/// Record an embedding fetch
pub fn record_embedding(duration_ms: f64, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!("reactivesql.embedding.requests", "outcome" => outcome).increment(1);
    histogram!("reactivesql.embedding.duration_ms").record(duration_ms);
}

/// Record a batch rejected by descriptor validation
pub fn record_validation_failure() {
    counter!("reactivesql.validation.rejected").increment(1);
}
