//! Metrics collection for registry operations
//!
//! Counters and latency histograms per public operation, exposed through a
//! Prometheus registry the embedding application can scrape.

use crate::error::RegistryError;
use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntCounter, Opts, Registry};
use std::time::Instant;

lazy_static! {
    /// Global Prometheus registry instance
    pub static ref REGISTRY_INSTANCE: Registry = Registry::new();

    /// Operation count by method and outcome
    pub static ref OP_COUNTER_VEC: CounterVec = CounterVec::new(
        Opts::new("registry_operation_total", "registry operations"),
        &["method", "outcome"]
    )
    .unwrap();

    /// Operation latency by method
    pub static ref OP_HISTOGRAM_VEC: HistogramVec = HistogramVec::new(
        HistogramOpts::new("registry_operation_seconds", "registry operation latency"),
        &["method"]
    )
    .unwrap();

    /// Records left out of a refresh because they could not be fetched or decoded
    pub static ref SKIPPED_RECORDS: IntCounter = IntCounter::new(
        "registry_skipped_records_total",
        "records skipped during refresh"
    )
    .unwrap();

    /// Refresh results dropped because a newer refresh had already been applied
    pub static ref SUPERSEDED_REFRESHES: IntCounter = IntCounter::new(
        "registry_superseded_refreshes_total",
        "refresh results discarded as stale"
    )
    .unwrap();
}

/// Registers all collectors with the global registry
pub fn init_registry() {
    let _ = REGISTRY_INSTANCE.register(Box::new(OP_COUNTER_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(OP_HISTOGRAM_VEC.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(SKIPPED_RECORDS.clone()));
    let _ = REGISTRY_INSTANCE.register(Box::new(SUPERSEDED_REFRESHES.clone()));
}

/// Times `handler` and counts its outcome under `method_name`
pub async fn record_metrics<F, Fut, T>(
    method_name: &'static str,
    handler: F,
) -> Result<T, RegistryError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, RegistryError>>,
{
    let start = Instant::now();
    let result = handler().await;

    let outcome = if result.is_ok() { "ok" } else { "error" };
    OP_COUNTER_VEC
        .with_label_values(&[method_name, outcome])
        .inc();
    OP_HISTOGRAM_VEC
        .with_label_values(&[method_name])
        .observe(start.elapsed().as_secs_f64());

    result
}
