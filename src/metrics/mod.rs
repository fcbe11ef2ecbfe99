//! Metrics module for Prometheus-based monitoring of grading runs.
//!
//! # Example
//!
//! ```ignore
//! use swe_grade::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_run("scored", "graduated", 0.73, 42.0);
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_RUNS, REGISTRY, RUNS_TOTAL, RUN_DURATION, SCOPE_RUNS_TOTAL, SCORE, STAGE_DURATION,
};
