//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BATCHES_TOTAL, ERRORS_TOTAL, PIECES_RENDERED_TOTAL, RECORDS_PROCESSED_TOTAL, RENDER_LATENCY,
    TEMPLATE_CACHE_HITS_TOTAL, TEMPLATE_COMPILATIONS_TOTAL, TEMPLATE_COMPILE_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording template metrics
pub struct TemplateMetrics;

impl TemplateMetrics {
    /// Record compiled pieces for a campaign
    pub fn record_compiled(pieces: usize) {
        TEMPLATE_COMPILATIONS_TOTAL.inc_by(pieces as u64);
    }

    pub fn record_cache_hit() {
        TEMPLATE_CACHE_HITS_TOTAL.inc();
    }

    pub fn record_compile_error() {
        TEMPLATE_COMPILE_ERRORS_TOTAL.inc();
    }

    /// Record a completed render request
    pub fn record_rendered(pieces: usize, elapsed: Duration) {
        PIECES_RENDERED_TOTAL.inc_by(pieces as u64);
        RENDER_LATENCY.observe(elapsed.as_secs_f64());
    }
}

/// Helper struct for recording record and batch outcomes
pub struct BatchMetrics;

impl BatchMetrics {
    pub fn record_record(success: bool) {
        RECORDS_PROCESSED_TOTAL
            .with_label_values(&[outcome(success)])
            .inc();
    }

    pub fn record_batch(success: bool) {
        BATCHES_TOTAL.with_label_values(&[outcome(success)]).inc();
    }
}

/// Helper struct for recording errors
pub struct ErrorMetrics;

impl ErrorMetrics {
    pub fn record(kind: &str) {
        ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}
