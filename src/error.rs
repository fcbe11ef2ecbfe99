//! Error types for grading operations.
//!
//! Each pipeline stage has its own error type; [`GradingError`] is the
//! taxonomy the orchestrator converts every stage failure into before it is
//! reduced to a score and diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::process::ProcessError;

/// Top-level failure taxonomy for a grading run.
#[derive(Debug, Error)]
pub enum GradingError {
    #[error("Workspace setup failed: {0}")]
    WorkspaceSetup(#[from] WorkspaceSetupError),

    #[error("Anti-Cheat test reset failed: {0}")]
    AntiCheatReset(String),

    #[error("Patch application failed: {0}")]
    PatchApply(#[from] PatchApplyError),

    #[error("Build failed with exit code {exit_code}")]
    BuildFailure { exit_code: i32 },

    #[error("Test scope '{scope}' timed out after {timeout:?}")]
    TestExecutionTimeout { scope: String, timeout: Duration },

    #[error("Result document could not be parsed: {0}")]
    ResultParse(#[from] ResultParseError),

    #[error("Invalid grading request: {0}")]
    InvalidRequest(String),
}

impl GradingError {
    /// Stable reason string reported in diagnostics and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GradingError::WorkspaceSetup(_) => "workspace_setup_error",
            GradingError::AntiCheatReset(_) => "anti_cheat_reset_error",
            GradingError::PatchApply(_) => "patch_apply_error",
            GradingError::BuildFailure { .. } => "build_failure",
            GradingError::TestExecutionTimeout { .. } => "test_timeout",
            GradingError::ResultParse(_) => "result_parse_error",
            GradingError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Errors that can occur while materializing a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceSetupError {
    #[error("Source repository '{0}' does not exist")]
    SourceMissing(PathBuf),

    #[error("Source path '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("Failed to copy '{path}': {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk source tree: {0}")]
    Walk(String),

    #[error("Workspace copy task failed: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while applying a patch.
#[derive(Debug, Error)]
pub enum PatchApplyError {
    #[error("Failed to read patch '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Patch '{path}' does not apply: {stderr}")]
    Conflict { path: PathBuf, stderr: String },

    #[error("git apply could not run: {0}")]
    Process(#[from] ProcessError),
}

/// Errors that can occur while parsing a JUnit result document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResultParseError {
    #[error("Malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("Document has no root element")]
    MissingRoot,

    #[error("Unexpected root element <{0}>, expected <testsuites> or <testsuite>")]
    UnexpectedRoot(String),

    #[error("Mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedTag { expected: String, found: String },

    #[error("Unclosed element <{0}> at end of document")]
    Unclosed(String),

    #[error("Invalid value '{value}' for attribute '{attribute}' in suite '{suite}'")]
    InvalidCount {
        suite: String,
        attribute: String,
        value: String,
    },

    #[error(
        "Suite '{suite}' has inconsistent counts: tests={total} failures={failures} errors={errors} skipped={skipped}"
    )]
    CountInvariant {
        suite: String,
        total: u64,
        failures: u64,
        errors: u64,
        skipped: u64,
    },

    #[error("Suite counts overflow when summed across the document")]
    CountOverflow,
}
