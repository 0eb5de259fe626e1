//! Prometheus metrics for compliance-service.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec, TextEncoder};

/// Classification counter by resulting category.
pub static CLASSIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "compliance_classifications_total",
        "Total number of tax classifications by category",
        &["category"] // super_reduced, reduced, general
    )
    .expect("Failed to register classifications_total")
});

/// Registration counter by outcome.
pub static REGISTRATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "compliance_registrations_total",
        "Total number of registration attempts by outcome",
        &["outcome"] // registered, failed, timeout
    )
    .expect("Failed to register registrations_total")
});

/// Annulment counter by outcome.
pub static ANNULMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "compliance_annulments_total",
        "Total number of annulment attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to register annulments_total")
});

/// Keystore reload counter.
pub static CERTIFICATE_RELOADS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "compliance_certificate_reloads_total",
        "Total number of keystore loads by status",
        &["status"]
    )
    .expect("Failed to register certificate_reloads_total")
});

/// Facturae document counter by outcome.
pub static FACTURAE_DOCUMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "compliance_facturae_documents_total",
        "Total number of Facturae documents by outcome",
        &["outcome"] // generated, failed
    )
    .expect("Failed to register facturae_documents_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&CLASSIFICATIONS_TOTAL);
    Lazy::force(&REGISTRATIONS_TOTAL);
    Lazy::force(&ANNULMENTS_TOTAL);
    Lazy::force(&CERTIFICATE_RELOADS_TOTAL);
    Lazy::force(&FACTURAE_DOCUMENTS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
