//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define service metrics (ingestion, merges, registry size, HTTP)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `metrics_usage_batches_enqueued_total` (counter): by mode
//! - `metrics_usage_batches_dropped_total` (counter): refused by overflow policy
//! - `metrics_usage_facts_rejected_total` (counter): malformed facts, by reason
//! - `metrics_usage_merge_duration_seconds` (histogram)
//! - `metrics_usage_registry_metrics` / `_invalid_usages` / `_sources` (gauges)
//! - `metrics_usage_queue_depth` (gauge)
//! - `metrics_usage_http_requests_total` (counter): by method, route, status
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op (tests, exporter disabled)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    metrics::describe_counter!(
        "metrics_usage_batches_enqueued_total",
        "Usage batches accepted into the ingestion queue"
    );
    metrics::describe_counter!(
        "metrics_usage_batches_dropped_total",
        "Usage batches refused because the ingestion queue was full"
    );
    metrics::describe_counter!(
        "metrics_usage_facts_rejected_total",
        "Malformed usage facts discarded by the merge engine"
    );
    metrics::describe_counter!("metrics_usage_merges_total", "Registry states published");
    metrics::describe_histogram!(
        "metrics_usage_merge_duration_seconds",
        "Time spent folding batches into the registry"
    );
    metrics::describe_gauge!("metrics_usage_registry_metrics", "Metrics with at least one user");
    metrics::describe_gauge!("metrics_usage_registry_invalid_usages", "Invalid usage entries");
    metrics::describe_gauge!("metrics_usage_registry_sources", "Sources with a recorded footprint");
    metrics::describe_gauge!("metrics_usage_queue_depth", "Batches waiting to be merged");
    metrics::describe_counter!("metrics_usage_http_requests_total", "HTTP requests served");
    metrics::describe_histogram!(
        "metrics_usage_http_request_duration_seconds",
        "HTTP request latency"
    );

    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_batch_enqueued(mode: &'static str, facts: usize) {
    metrics::counter!("metrics_usage_batches_enqueued_total", "mode" => mode).increment(1);
    metrics::counter!("metrics_usage_facts_enqueued_total", "mode" => mode).increment(facts as u64);
}

pub fn record_batch_dropped(mode: &'static str) {
    metrics::counter!("metrics_usage_batches_dropped_total", "mode" => mode).increment(1);
}

pub fn record_fact_rejected(reason: &'static str) {
    metrics::counter!("metrics_usage_facts_rejected_total", "reason" => reason).increment(1);
}

pub fn record_merge(batches: usize, applied: u64, start: Instant) {
    metrics::counter!("metrics_usage_merges_total").increment(1);
    metrics::counter!("metrics_usage_batches_merged_total").increment(batches as u64);
    metrics::counter!("metrics_usage_facts_applied_total").increment(applied);
    metrics::histogram!("metrics_usage_merge_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_registry_size(metric_count: usize, invalid: usize, sources: usize) {
    metrics::gauge!("metrics_usage_registry_metrics").set(metric_count as f64);
    metrics::gauge!("metrics_usage_registry_invalid_usages").set(invalid as f64);
    metrics::gauge!("metrics_usage_registry_sources").set(sources as f64);
}

pub fn record_queue_depth(depth: u64) {
    metrics::gauge!("metrics_usage_queue_depth").set(depth as f64);
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("metrics_usage_http_requests_total", &labels).increment(1);
    metrics::histogram!("metrics_usage_http_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}
