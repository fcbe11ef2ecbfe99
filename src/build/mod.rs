//! Build gate.
//!
//! The configured build command must succeed before any test runs. A
//! failure is not an error for the orchestrator: it yields a synthetic
//! `CompileError` document and a fixed score of 0.0.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::junit::TestResultDocument;
use crate::process::{Invocation, ProcessRunner};
use crate::workspace::Workspace;

/// Suite name of the synthetic build-failure document.
pub const COMPILE_ERROR_SUITE: &str = "CompileError";

/// An external command relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory relative to the workspace root; the root itself when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Absolute working directory for this command in `root`.
    pub fn cwd(&self, root: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }

    /// Invocation of this command in `root`.
    pub fn invocation(&self, root: &Path) -> Invocation {
        Invocation::new(&self.program, self.cwd(root)).args(self.args.iter().cloned())
    }
}

/// `ninja` in `build/`.
impl Default for CommandSpec {
    fn default() -> Self {
        CommandSpec::new("ninja").in_dir("build")
    }
}

/// Result of the build gate.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Built { duration_ms: u64 },
    Failed {
        exit_code: i32,
        document: TestResultDocument,
    },
}

impl BuildOutcome {
    /// Diagnostic summary of the outcome.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            BuildOutcome::Built { duration_ms } => serde_json::json!({
                "status": "built",
                "duration_ms": duration_ms,
            }),
            BuildOutcome::Failed { exit_code, .. } => serde_json::json!({
                "status": "failed",
                "exit_code": exit_code,
            }),
        }
    }
}

/// Runs the build command in a workspace.
pub struct BuildStage {
    command: CommandSpec,
    runner: Arc<dyn ProcessRunner>,
}

impl BuildStage {
    pub fn new(command: CommandSpec, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { command, runner }
    }

    /// Runs the build with no internal timeout.
    pub async fn run(&self, workspace: &Workspace) -> BuildOutcome {
        let invocation = self.command.invocation(workspace.root());
        tracing::info!(command = %invocation.display(), "Building workspace");
        let start = Instant::now();

        match self.runner.run(&invocation).await {
            Ok(output) if output.success() => BuildOutcome::Built {
                duration_ms: start.elapsed().as_millis() as u64,
            },
            Ok(output) => {
                tracing::warn!(exit_code = output.exit_code, "Build failed");
                BuildOutcome::Failed {
                    exit_code: output.exit_code,
                    document: TestResultDocument::synthetic(
                        COMPILE_ERROR_SUITE,
                        "Build Failed",
                        &output.stdout_lossy(),
                        &output.stderr_lossy(),
                    ),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Build command could not run");
                BuildOutcome::Failed {
                    exit_code: -1,
                    document: TestResultDocument::synthetic(
                        COMPILE_ERROR_SUITE,
                        "Build Failed",
                        "",
                        &e.to_string(),
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessError, ProcessOutput, ScriptedRunner};
    use crate::workspace::WorkspaceManager;
    use tempfile::TempDir;

    async fn workspace(scratch: &TempDir) -> Workspace {
        let repo = TempDir::new().unwrap();
        std::fs::create_dir_all(repo.path().join("build")).unwrap();
        WorkspaceManager::new(scratch.path())
            .create(repo.path())
            .await
            .unwrap()
    }

    #[test]
    fn test_default_command_is_ninja_in_build() {
        let spec = CommandSpec::default();
        assert_eq!(spec.program, "ninja");
        assert_eq!(spec.cwd(Path::new("/ws")), PathBuf::from("/ws/build"));
    }

    #[tokio::test]
    async fn test_successful_build() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch).await;
        let runner = Arc::new(ScriptedRunner::succeeding());
        let outcome = BuildStage::new(CommandSpec::default(), runner.clone())
            .run(&ws)
            .await;
        assert!(matches!(outcome, BuildOutcome::Built { .. }));
        assert_eq!(runner.invocations()[0].cwd, ws.path("build"));
        assert_eq!(outcome.summary()["status"], "built");
    }

    #[tokio::test]
    async fn test_failed_build_yields_compile_error_document() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch).await;
        let runner = Arc::new(ScriptedRunner::new(|_| {
            Ok(ProcessOutput::new(1, "[1/2] CXX foo.o", "foo.cpp:3: error: expected ';'"))
        }));
        let outcome = BuildStage::new(CommandSpec::default(), runner).run(&ws).await;
        match outcome {
            BuildOutcome::Failed { exit_code, document } => {
                assert_eq!(exit_code, 1);
                assert_eq!(document.suites[0].name, COMPILE_ERROR_SUITE);
                let case = &document.suites[0].testcases[0];
                assert!(case.system_err.as_deref().unwrap().contains("expected ';'"));
                assert!(case.system_out.as_deref().unwrap().contains("CXX foo.o"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_build_failure() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch).await;
        let runner = Arc::new(ScriptedRunner::new(|inv| {
            Err(ProcessError::Spawn {
                command: inv.display(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no ninja"),
            })
        }));
        let outcome = BuildStage::new(CommandSpec::default(), runner).run(&ws).await;
        assert!(matches!(outcome, BuildOutcome::Failed { exit_code: -1, .. }));
    }
}
