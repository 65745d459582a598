//! Prometheus metrics for the session service.
//!
//! Provides counters and histograms for observability.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder};

/// Facade operation latency histogram.
pub static OPERATION_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "session_service_operation_latency_seconds",
        "Session operation latency in seconds",
        &["operation", "outcome"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register operation_latency metric")
});

/// Tokens issued counter.
pub static TOKENS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_service_tokens_issued_total",
        "Total number of tokens issued",
        &["token_type", "flow"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Rotation outcomes counter.
pub static ROTATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_service_rotations_total",
        "Total number of refresh rotations by outcome",
        &["outcome"]
    )
    .expect("Failed to register rotations metric")
});

/// Families revoked counter.
pub static FAMILIES_REVOKED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_service_families_revoked_total",
        "Total number of token families revoked",
        &["reason"]
    )
    .expect("Failed to register families_revoked metric")
});

/// Security events counter.
pub static SECURITY_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_service_security_events_total",
        "Total number of security events",
        &["event_type"]
    )
    .expect("Failed to register security_events metric")
});

/// Status cache lookups counter.
pub static STATUS_CACHE: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_service_status_cache_total",
        "Family status cache lookups",
        &["result"]
    )
    .expect("Failed to register status_cache metric")
});

/// Store operations counter.
pub static STORE_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "session_service_store_operations_total",
        "Total number of family store operations",
        &["operation", "status"]
    )
    .expect("Failed to register store_operations metric")
});

/// Record facade operation latency.
pub fn record_operation(operation: &str, outcome: &str, duration_secs: f64) {
    OPERATION_LATENCY
        .with_label_values(&[operation, outcome])
        .observe(duration_secs);
}

/// Record an access/refresh pair issuance.
pub fn record_pair_issued(flow: &str) {
    TOKENS_ISSUED.with_label_values(&["access", flow]).inc();
    TOKENS_ISSUED.with_label_values(&["refresh", flow]).inc();
}

/// Record a rotation outcome.
pub fn record_rotation(outcome: &str) {
    ROTATIONS.with_label_values(&[outcome]).inc();
}

/// Record a family revocation.
pub fn record_family_revoked(reason: &str) {
    FAMILIES_REVOKED.with_label_values(&[reason]).inc();
}

/// Record a security event.
pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}

/// Record a status cache lookup.
pub fn record_status_cache(hit: bool) {
    STATUS_CACHE
        .with_label_values(&[if hit { "hit" } else { "miss" }])
        .inc();
}

/// Record a store operation.
pub fn record_store_operation(operation: &str, status: &str) {
    STORE_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
