//! Prometheus metrics for annexure-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for gRPC requests by method and status.
pub static GRPC_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "annexure_grpc_requests_total",
        "Total number of gRPC requests",
        &["method", "status"]
    )
    .expect("Failed to register GRPC_REQUESTS")
});

pub static GRPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "annexure_grpc_request_duration_seconds",
        "gRPC request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register GRPC_REQUEST_DURATION")
});

/// Histogram for database query duration by operation.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "annexure_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for per-LR attach classifications.
pub static ATTACH_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "annexure_attach_outcomes_total",
        "Total number of LRs classified by bulk attach",
        &["outcome"]
    )
    .expect("Failed to register ATTACH_OUTCOMES")
});

pub static INVOICES_GENERATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "annexure_invoices_generated_total",
        "Total number of invoices generated",
        &["source"]
    )
    .expect("Failed to register INVOICES_GENERATED")
});

pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "annexure_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&GRPC_REQUESTS);
    Lazy::force(&GRPC_REQUEST_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&ATTACH_OUTCOMES);
    Lazy::force(&INVOICES_GENERATED);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_grpc_request(method: &str, status: &str) {
    GRPC_REQUESTS.with_label_values(&[method, status]).inc();
}

pub fn record_grpc_request_duration(method: &str, duration_secs: f64) {
    GRPC_REQUEST_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

pub fn record_attach_outcome(outcome: &str, count: usize) {
    if count > 0 {
        ATTACH_OUTCOMES
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

/// Record generated invoices, labelled `annexure` or `files`.
pub fn record_invoices_generated(source: &str, count: usize) {
    INVOICES_GENERATED
        .with_label_values(&[source])
        .inc_by(count as f64);
}

pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
