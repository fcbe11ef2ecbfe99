//! swe-grade: grading pipeline for software-engineering tasks.
//!
//! A grading run copies a reference repository into an isolated workspace,
//! restores hidden test files from a trusted golden reference, applies patches,
//! builds, runs the tests and reduces the JUnit results to a reward in
//! `[0.0, 1.0]` with diagnostics.

pub mod build;
pub mod cli;
pub mod error;
pub mod executor;
pub mod grading;
pub mod guard;
pub mod junit;
pub mod metrics;
pub mod patch;
pub mod process;
pub mod scoring;
pub mod workspace;

// Re-export commonly used types
pub use error::{GradingError, PatchApplyError, ResultParseError, WorkspaceSetupError};
pub use grading::{GradingConfig, GradingRequest, GradingRunner, ScoreResult};
pub use junit::{ResultAggregator, TestResultDocument};
pub use scoring::{ScoringEngine, ScoringPolicy};
