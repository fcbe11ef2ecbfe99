//! The grading pipeline: request, configuration, orchestration and batching.

pub mod batch;
pub mod config;
pub mod events;
pub mod request;
pub mod runner;

pub use batch::{load_tasks, run_batch, BatchEntry, BatchSummary, GradingTask};
pub use config::{AntiCheatSettings, ConfigError, GradingConfig};
pub use events::{EventLevel, EventLog, RunState, Stage, StageEvent};
pub use request::{
    CommitReference, GradingRequest, TargetFileSet, DEFAULT_GOLDEN_PATCH_PATH,
    DEFAULT_TEST_PATCH_PATH,
};
pub use runner::{Diagnostics, GradingRunner, ScoreResult, ANTI_CHEAT_ERROR, INTERNAL_ERROR};
