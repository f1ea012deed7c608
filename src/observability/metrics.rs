//! # Metrics
//!
//! Prometheus metrics for monitoring the sidecar.
//!
//! ## Metrics Exposed
//!
//! - `file_sidecar_watch_events_total{kind,type}` - Watch events received
//! - `file_sidecar_files_written_total{kind}` - Files written to disk
//! - `file_sidecar_resources_removed_total{kind}` - Resource directories removed
//! - `file_sidecar_materialize_errors_total{kind}` - Failed writes or deletes
//! - `file_sidecar_watch_restarts_total{kind,cause}` - Watch streams reopened
//! - `file_sidecar_resyncs_total{kind}` - Full list passes
//! - `file_sidecar_materialized_resources{kind}` - Resources currently on disk

use anyhow::Result;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("file_sidecar_watch_events_total", "Total number of watch events received"),
        &["kind", "type"],
    )
    .expect("Failed to create WATCH_EVENTS_TOTAL metric - this should never happen")
});

static FILES_WRITTEN_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("file_sidecar_files_written_total", "Total number of files written"),
        &["kind"],
    )
    .expect("Failed to create FILES_WRITTEN_TOTAL metric - this should never happen")
});

static RESOURCES_REMOVED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "file_sidecar_resources_removed_total",
            "Total number of resources whose files were removed",
        ),
        &["kind"],
    )
    .expect("Failed to create RESOURCES_REMOVED_TOTAL metric - this should never happen")
});

static MATERIALIZE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "file_sidecar_materialize_errors_total",
            "Total number of failed file writes or removals",
        ),
        &["kind"],
    )
    .expect("Failed to create MATERIALIZE_ERRORS_TOTAL metric - this should never happen")
});

static WATCH_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("file_sidecar_watch_restarts_total", "Total number of watch restarts"),
        &["kind", "cause"],
    )
    .expect("Failed to create WATCH_RESTARTS_TOTAL metric - this should never happen")
});

static RESYNCS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("file_sidecar_resyncs_total", "Total number of full list passes"),
        &["kind"],
    )
    .expect("Failed to create RESYNCS_TOTAL metric - this should never happen")
});

static MATERIALIZED_RESOURCES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "file_sidecar_materialized_resources",
            "Current number of resources materialized on disk",
        ),
        &["kind"],
    )
    .expect("Failed to create MATERIALIZED_RESOURCES metric - this should never happen")
});

pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(WATCH_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FILES_WRITTEN_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESOURCES_REMOVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MATERIALIZE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RESYNCS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MATERIALIZED_RESOURCES.clone()))?;
    Ok(())
}

pub fn increment_watch_events(kind: &str, event_type: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[kind, event_type]).inc();
}

pub fn increment_files_written(kind: &str, count: usize) {
    FILES_WRITTEN_TOTAL
        .with_label_values(&[kind])
        .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}

pub fn increment_resources_removed(kind: &str) {
    RESOURCES_REMOVED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_materialize_errors(kind: &str) {
    MATERIALIZE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_watch_restarts(kind: &str, cause: &str) {
    WATCH_RESTARTS_TOTAL.with_label_values(&[kind, cause]).inc();
}

pub fn increment_resyncs(kind: &str) {
    RESYNCS_TOTAL.with_label_values(&[kind]).inc();
}

/// Adjust the gauge by the change in one loop's index size
pub fn add_materialized_resources(kind: &str, delta: i64) {
    MATERIALIZED_RESOURCES.with_label_values(&[kind]).add(delta);
}

/// Prometheus text exposition of every registered metric
pub fn gather_text() -> Result<String> {
    use prometheus::{Encoder, TextEncoder};

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
