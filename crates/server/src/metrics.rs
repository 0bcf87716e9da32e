//! Prometheus metrics for the canopy server.
//!
//! Exposes counters for tree mutations and transaction settlement, cache and
//! blob cleanup failures, and the depth of size propagation walks.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Restrict it at the network level when the server is reachable from
//! untrusted clients.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Mutation metrics
pub static MUTATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "canopy_mutations_total",
            "Committed folder tree mutations by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "canopy_bytes_uploaded_total",
        "Total bytes of file content accepted",
    )
    .expect("metric creation failed")
});

pub static PROPAGATION_DEPTH: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "canopy_propagation_depth",
            "Number of folders touched by one size propagation walk",
        )
        .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0]),
    )
    .expect("metric creation failed")
});

// Settlement metrics
pub static SETTLEMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "canopy_settlements_total",
            "Upload transaction lifecycle events by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static SETTLEMENT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "canopy_settlement_duration_seconds",
            "Time taken to complete an upload transaction",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static LEDGER_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "canopy_ledger_mismatches_total",
        "Completions where the staged cache delta disagreed with the file ledger",
    )
    .expect("metric creation failed")
});

// Failure metrics
pub static CACHE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "canopy_cache_failures_total",
            "Size cache operations that failed, by operation",
        ),
        &["operation"],
    )
    .expect("metric creation failed")
});

pub static BLOB_CLEANUP_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "canopy_blob_cleanup_failures_total",
        "Blobs that could not be deleted after their file rows were removed",
    )
    .expect("metric creation failed")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(MUTATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PROPAGATION_DEPTH.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SETTLEMENTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SETTLEMENT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LEDGER_MISMATCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BLOB_CLEANUP_FAILURES.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a committed mutation.
pub fn record_mutation(kind: &str) {
    MUTATIONS.with_label_values(&[kind]).inc();
}

/// Count a settlement outcome.
pub fn record_settlement(outcome: &str) {
    SETTLEMENTS.with_label_values(&[outcome]).inc();
}

/// Count a failed cache operation.
pub fn record_cache_failure(operation: &str) {
    CACHE_FAILURES.with_label_values(&[operation]).inc();
}

pub fn observe_propagation(depth: usize) {
    if depth > 0 {
        PROPAGATION_DEPTH.observe(depth as f64);
    }
}
