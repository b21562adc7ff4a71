//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_breaker_transitions_total` (counter): by resource, target state
//! - `resilience_breaker_rejections_total` (counter): fast-fail rejections
//! - `resilience_retry_attempts_total` (counter): retries by operation
//! - `resilience_bulkhead_in_flight` / `resilience_bulkhead_queued` (gauges)
//! - `resilience_bulkhead_rejections_total` (counter): by reason
//! - `resilience_cache_events_total` (counter): hit, miss, stale, fetch_error, evicted, refresh
//! - `resilience_cache_entries` (gauge)
//! - `resilience_fallback_attempts_total` (counter): by key, outcome
//! - `resilience_health_check` (gauge): 1=healthy, 0=unhealthy

use std::net::SocketAddr;

/// Install the Prometheus exporter on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_breaker_transition(resource: &str, to: &'static str, state_code: u8) {
    ::metrics::counter!(
        "resilience_breaker_transitions_total",
        "resource" => resource.to_string(),
        "to" => to
    )
    .increment(1);
    ::metrics::gauge!("resilience_breaker_state", "resource" => resource.to_string())
        .set(f64::from(state_code));
}

pub fn record_breaker_rejection(resource: &str) {
    ::metrics::counter!("resilience_breaker_rejections_total", "resource" => resource.to_string())
        .increment(1);
}

pub fn record_retry_attempt(operation: &str) {
    ::metrics::counter!("resilience_retry_attempts_total", "operation" => operation.to_string())
        .increment(1);
}

pub fn record_bulkhead_usage(name: &str, in_flight: usize, queued: usize) {
    ::metrics::gauge!("resilience_bulkhead_in_flight", "name" => name.to_string())
        .set(in_flight as f64);
    ::metrics::gauge!("resilience_bulkhead_queued", "name" => name.to_string())
        .set(queued as f64);
}

pub fn record_bulkhead_rejection(name: &str, reason: &'static str) {
    ::metrics::counter!(
        "resilience_bulkhead_rejections_total",
        "name" => name.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_cache_event(cache: &str, event: &'static str) {
    ::metrics::counter!(
        "resilience_cache_events_total",
        "cache" => cache.to_string(),
        "event" => event
    )
    .increment(1);
}

pub fn record_cache_size(cache: &str, entries: usize) {
    ::metrics::gauge!("resilience_cache_entries", "cache" => cache.to_string())
        .set(entries as f64);
}

pub fn record_fallback_attempt(key: &str, outcome: &'static str) {
    ::metrics::counter!(
        "resilience_fallback_attempts_total",
        "key" => key.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_health_check(check: &str, healthy: bool) {
    ::metrics::gauge!("resilience_health_check", "check" => check.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
