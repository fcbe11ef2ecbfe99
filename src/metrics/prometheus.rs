//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by swe_grade and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all swe_grade metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total grading runs, labeled by reason and scoring policy.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Distribution of final scores, labeled by scoring policy.
pub static SCORE: OnceLock<HistogramVec> = OnceLock::new();

/// End-to-end grading run duration in seconds.
pub static RUN_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Per-stage duration in seconds, labeled by stage.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Total test scope invocations, labeled by status.
pub static SCOPE_RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of grading runs currently in progress.
pub static ACTIVE_RUNS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Calling it again is harmless: the first registry
/// stays in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("swe_grade_runs_total", "Total number of grading runs"),
        &["reason", "policy"],
    )?;

    let score = HistogramVec::new(
        HistogramOpts::new("swe_grade_score", "Distribution of grading scores")
            .buckets(vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]),
        &["policy"],
    )?;

    let run_duration = Histogram::with_opts(
        HistogramOpts::new(
            "swe_grade_run_duration_seconds",
            "Grading run duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
    )?;

    let stage_duration = HistogramVec::new(
        HistogramOpts::new(
            "swe_grade_stage_duration_seconds",
            "Grading stage duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["stage"],
    )?;

    let scope_runs_total = CounterVec::new(
        Opts::new("swe_grade_scope_runs_total", "Total test scope invocations"),
        &["status"],
    )?;

    let active_runs = Gauge::new(
        "swe_grade_active_runs",
        "Number of grading runs in progress",
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(score.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(scope_runs_total.clone()))?;
    registry.register(Box::new(active_runs.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = SCORE.set(score);
    let _ = RUN_DURATION.set(run_duration);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = SCOPE_RUNS_TOTAL.set(scope_runs_total);
    let _ = ACTIVE_RUNS.set(active_runs);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_metrics_never_empty() {
        let metrics = export_metrics();
        assert!(!metrics.is_empty());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();
        if let Some(runs) = RUNS_TOTAL.get() {
            runs.with_label_values(&["scored", "graduated"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        if REGISTRY.get().is_some() {
            assert!(metrics.contains("swe_grade_runs_total"));
        }
    }
}
