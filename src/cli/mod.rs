//! Command-line interface for swe-grade.
//!
//! Provides commands for grading a single submission, scoring existing JUnit
//! reports offline and grading a batch of mined tasks.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
