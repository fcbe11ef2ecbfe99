//! Per-run event log and state machine.
//!
//! Stages report what happened through an [`EventLog`] owned by the run
//! rather than a process-wide logger. Each event is mirrored into `tracing`
//! with the run id and ends up in the diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Workspace,
    AntiCheat,
    Patch,
    Build,
    Test,
    Aggregate,
    Score,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::AntiCheat => "anti_cheat",
            Self::Patch => "patch",
            Self::Build => "build",
            Self::Test => "test",
            Self::Aggregate => "aggregate",
            Self::Score => "score",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a run is in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    WorkspacePrepared,
    AntiCheatApplied,
    PatchApplied,
    Built,
    Tested,
    Aggregated,
    Scored,
    Failed { stage: Stage, reason: String },
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::WorkspacePrepared => "workspace_prepared",
            Self::AntiCheatApplied => "anti_cheat_applied",
            Self::PatchApplied => "patch_applied",
            Self::Built => "built",
            Self::Tested => "tested",
            Self::Aggregated => "aggregated",
            Self::Scored => "scored",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Scored | Self::Failed { .. })
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { stage, reason } => write!(f, "failed({}: {})", stage, reason),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: Stage,
    pub level: EventLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Diagnostics sink for one grading run.
#[derive(Debug, Clone)]
pub struct EventLog {
    run_id: String,
    state: RunState,
    events: Vec<StageEvent>,
}

impl EventLog {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: RunState::Created,
            events: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn events(&self) -> &[StageEvent] {
        &self.events
    }

    /// Records a state transition as an info event.
    pub fn transition(&mut self, stage: Stage, state: RunState) {
        let message = format!("{} -> {}", self.state.name(), state.name());
        self.state = state;
        self.push(stage, EventLevel::Info, message);
    }

    /// Moves to `Failed` and records the reason as an error event.
    pub fn fail(&mut self, stage: Stage, reason: impl Into<String>) {
        let reason = reason.into();
        self.push(stage, EventLevel::Error, reason.clone());
        self.state = RunState::Failed { stage, reason };
    }

    pub fn info(&mut self, stage: Stage, message: impl Into<String>) {
        self.push(stage, EventLevel::Info, message.into());
    }

    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        self.push(stage, EventLevel::Warn, message.into());
    }

    pub fn error(&mut self, stage: Stage, message: impl Into<String>) {
        self.push(stage, EventLevel::Error, message.into());
    }

    fn push(&mut self, stage: Stage, level: EventLevel, message: String) {
        match level {
            EventLevel::Info => {
                tracing::info!(run_id = %self.run_id, stage = %stage, "{}", message)
            }
            EventLevel::Warn => {
                tracing::warn!(run_id = %self.run_id, stage = %stage, "{}", message)
            }
            EventLevel::Error => {
                tracing::error!(run_id = %self.run_id, stage = %stage, "{}", message)
            }
        }
        self.events.push(StageEvent {
            stage,
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    /// Events as a JSON array for the diagnostics map.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.events).unwrap_or(serde_json::Value::Null)
    }
}
