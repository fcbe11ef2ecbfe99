//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code
//! can record unconditionally.

use super::prometheus::{
    ACTIVE_RUNS, RUNS_TOTAL, RUN_DURATION, SCOPE_RUNS_TOTAL, SCORE, STAGE_DURATION,
};

/// Metrics collector for grading runs.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a finished grading run.
    ///
    /// # Arguments
    ///
    /// * `reason` - Why the run ended (e.g., "scored", "build_failure")
    /// * `policy` - Scoring policy in effect ("graduated" or "binary")
    /// * `score` - Final score
    /// * `duration_secs` - End-to-end run duration in seconds
    pub fn record_run(&self, reason: &str, policy: &str, score: f64, duration_secs: f64) {
        if let Some(runs) = RUNS_TOTAL.get() {
            runs.with_label_values(&[reason, policy]).inc();
        }

        if let Some(scores) = SCORE.get() {
            scores.with_label_values(&[policy]).observe(score);
        }

        if let Some(duration) = RUN_DURATION.get() {
            duration.observe(duration_secs);
        }

        tracing::trace!(
            reason = reason,
            policy = policy,
            score = score,
            duration_secs = duration_secs,
            "Recorded run metric"
        );
    }

    /// Record how long a pipeline stage took.
    pub fn record_stage(&self, stage: &str, duration_secs: f64) {
        if let Some(stages) = STAGE_DURATION.get() {
            stages.with_label_values(&[stage]).observe(duration_secs);
        }
    }

    /// Record one test scope invocation.
    pub fn record_scope(&self, status: &str) {
        if let Some(scopes) = SCOPE_RUNS_TOTAL.get() {
            scopes.with_label_values(&[status]).inc();
        }
    }

    /// Mark a grading run as started.
    pub fn run_started(&self) {
        if let Some(active) = ACTIVE_RUNS.get() {
            active.inc();
        }
    }

    /// Mark a grading run as finished.
    pub fn run_finished(&self) {
        if let Some(active) = ACTIVE_RUNS.get() {
            active.dec();
        }
    }
}
