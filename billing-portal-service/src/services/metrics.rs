//! Prometheus metrics for billing-portal-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec, TextEncoder,
};

/// Usage imports by outcome (imported, rejected, failed).
pub static USAGE_IMPORTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_portal_usage_imports_total",
        "Total usage imports by outcome",
        &["outcome"]
    )
    .expect("Failed to register usage_imports_total")
});

/// Parsed rows by disposition (valid, rejected).
pub static USAGE_ROWS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_portal_usage_rows_total",
        "Total usage rows seen during imports",
        &["disposition"]
    )
    .expect("Failed to register usage_rows_total")
});

/// Cents queued as pending charges by source.
pub static CHARGE_AMOUNT_CENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_portal_charge_amount_cents_total",
        "Total cents queued as pending charges",
        &["source"]
    )
    .expect("Failed to register charge_amount_cents_total")
});

/// Compensating deletes by outcome (compensated, orphaned).
pub static CHARGE_COMPENSATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_portal_charge_compensations_total",
        "Compensating usage event deletes after a failed pending item insert",
        &["outcome"]
    )
    .expect("Failed to register charge_compensations_total")
});

/// Portal access decisions by channel and outcome.
pub static PORTAL_ACCESS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_portal_access_total",
        "Portal access decisions",
        &["channel", "outcome"]
    )
    .expect("Failed to register portal_access_total")
});

/// Payment processor mirror calls by operation and status.
pub static PAYMENT_MIRROR_CALLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_portal_payment_mirror_calls_total",
        "Payment processor mirror calls",
        &["operation", "status"]
    )
    .expect("Failed to register payment_mirror_calls_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "billing_portal_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "billing_portal_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&USAGE_IMPORTS_TOTAL);
    Lazy::force(&USAGE_ROWS_TOTAL);
    Lazy::force(&CHARGE_AMOUNT_CENTS_TOTAL);
    Lazy::force(&CHARGE_COMPENSATIONS_TOTAL);
    Lazy::force(&PORTAL_ACCESS_TOTAL);
    Lazy::force(&PAYMENT_MIRROR_CALLS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
