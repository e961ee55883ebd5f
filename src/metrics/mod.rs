//! Prometheus metrics for the campaign archiver.
//!
//! - Template metrics (compilations, cache hits, compile errors, render latency)
//! - Record and batch outcome metrics
//! - Error counts by kind

mod helpers;

pub use helpers::{encode_metrics, BatchMetrics, ErrorMetrics, TemplateMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "archiver";

lazy_static! {
    // ============================================================================
    // Template Metrics
    // ============================================================================

    /// Content pieces compiled into templates
    pub static ref TEMPLATE_COMPILATIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_template_compilations_total", METRIC_PREFIX),
        "Total content pieces compiled into templates"
    ).unwrap();

    /// Lookups served from the per-campaign template cache
    pub static ref TEMPLATE_CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_template_cache_hits_total", METRIC_PREFIX),
        "Total template cache hits"
    ).unwrap();

    /// Campaign compilations that failed
    pub static ref TEMPLATE_COMPILE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_template_compile_errors_total", METRIC_PREFIX),
        "Total failed campaign template compilations"
    ).unwrap();

    /// Rendered content pieces
    pub static ref PIECES_RENDERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pieces_rendered_total", METRIC_PREFIX),
        "Total content pieces rendered"
    ).unwrap();

    /// Time to render all pieces of one request
    pub static ref RENDER_LATENCY: Histogram = register_histogram!(
        format!("{}_render_latency_seconds", METRIC_PREFIX),
        "Render latency per request in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    // ============================================================================
    // Record & Batch Metrics
    // ============================================================================

    /// Processed records by outcome
    pub static ref RECORDS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_records_processed_total", METRIC_PREFIX),
        "Total event records processed",
        &["outcome"]
    ).unwrap();

    /// Processed batches by outcome
    pub static ref BATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_batches_total", METRIC_PREFIX),
        "Total batches processed",
        &["outcome"]
    ).unwrap();

    /// Errors by kind
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_errors_total", METRIC_PREFIX),
        "Total errors by kind",
        &["kind"]
    ).unwrap();
}
