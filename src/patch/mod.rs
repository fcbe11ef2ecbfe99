//! Application of supplementary patches to a workspace.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PatchApplyError;
use crate::process::{truncate, Invocation, ProcessRunner};
use crate::workspace::Workspace;

/// Whether a patch that does not apply aborts the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchMode {
    #[default]
    Tolerant,
    Strict,
}

impl std::fmt::Display for PatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tolerant => write!(f, "tolerant"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for PatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tolerant" => Ok(Self::Tolerant),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown mode '{}', expected strict or tolerant", other)),
        }
    }
}

/// What a patch is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchRole {
    /// Hidden tests added on top of the submission.
    Test,
    /// Reference fix, applied only when validating a task.
    Golden,
}

impl PatchRole {
    /// Whether a failure to apply aborts the run under `mode`.
    /// The golden patch is always strict.
    pub fn is_fatal(&self, mode: PatchMode) -> bool {
        match self {
            PatchRole::Golden => true,
            PatchRole::Test => mode == PatchMode::Strict,
        }
    }
}

impl std::fmt::Display for PatchRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Golden => write!(f, "golden"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOutcome {
    /// No patch file at the given path.
    Absent,
    /// The file contains only whitespace.
    Empty,
    /// The reverse patch applies cleanly, so the changes are already present.
    AlreadyApplied,
    Applied,
}

/// Diagnostic record for one patch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchReport {
    pub role: PatchRole,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PatchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PatchReport {
    pub fn from_result(
        role: PatchRole,
        path: &Path,
        result: &Result<PatchOutcome, PatchApplyError>,
    ) -> Self {
        let (outcome, error) = match result {
            Ok(outcome) => (Some(*outcome), None),
            Err(e) => (None, Some(truncate(&e.to_string(), 2000))),
        };
        Self {
            role,
            path: path.to_path_buf(),
            outcome,
            error,
        }
    }
}

/// Applies patch files with `git apply`.
pub struct PatchApplier {
    runner: Arc<dyn ProcessRunner>,
}

impl PatchApplier {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Applies the patch at `patch_path`, if any, to the workspace.
    pub async fn apply(
        &self,
        workspace: &Workspace,
        patch_path: &Path,
    ) -> Result<PatchOutcome, PatchApplyError> {
        let bytes = match tokio::fs::read(patch_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(patch = %patch_path.display(), "No patch file, skipping");
                return Ok(PatchOutcome::Absent);
            }
            Err(source) => {
                return Err(PatchApplyError::Unreadable {
                    path: patch_path.to_path_buf(),
                    source,
                })
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            tracing::debug!(patch = %patch_path.display(), "Patch file is empty, skipping");
            return Ok(PatchOutcome::Empty);
        }

        let check = self
            .git_apply(workspace, &["--check"], &bytes)
            .await?;
        if check.success() {
            let applied = self.git_apply(workspace, &[], &bytes).await?;
            if !applied.success() {
                return Err(PatchApplyError::Conflict {
                    path: patch_path.to_path_buf(),
                    stderr: applied.stderr_lossy(),
                });
            }
            tracing::info!(patch = %patch_path.display(), "Patch applied");
            return Ok(PatchOutcome::Applied);
        }

        let reverse = self
            .git_apply(workspace, &["--reverse", "--check"], &bytes)
            .await?;
        if reverse.success() {
            tracing::info!(patch = %patch_path.display(), "Patch already applied");
            return Ok(PatchOutcome::AlreadyApplied);
        }

        Err(PatchApplyError::Conflict {
            path: patch_path.to_path_buf(),
            stderr: check.stderr_lossy(),
        })
    }

    async fn git_apply(
        &self,
        workspace: &Workspace,
        flags: &[&str],
        patch: &[u8],
    ) -> Result<crate::process::ProcessOutput, PatchApplyError> {
        let invocation = Invocation::new("git", workspace.root())
            .arg("apply")
            .args(flags.iter().copied())
            .arg("-")
            .stdin(patch.to_vec());
        Ok(self.runner.run(&invocation).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessOutput, ScriptedRunner};
    use crate::workspace::WorkspaceManager;
    use std::fs;
    use tempfile::TempDir;

    const PATCH: &str = "diff --git a/tests/a_test.go b/tests/a_test.go\n";

    async fn setup() -> (TempDir, TempDir, Workspace) {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join("main.go"), "package main\n").unwrap();
        let scratch = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(scratch.path())
            .create(repo.path())
            .await
            .unwrap();
        (repo, scratch, ws)
    }

    fn runner(check_ok: bool, reverse_ok: bool) -> ScriptedRunner {
        ScriptedRunner::new(move |inv| {
            let reverse = inv.args.iter().any(|a| a == "--reverse");
            let check = inv.args.iter().any(|a| a == "--check");
            let ok = if reverse {
                reverse_ok
            } else if check {
                check_ok
            } else {
                true
            };
            if ok {
                Ok(ProcessOutput::ok(Vec::new()))
            } else {
                Ok(ProcessOutput::failed(1, "error: patch failed: tests/a_test.go:1"))
            }
        })
    }

    #[tokio::test]
    async fn test_missing_patch_is_absent() {
        let (_repo, scratch, ws) = setup().await;
        let r = Arc::new(runner(true, false));
        let applier = PatchApplier::new(r.clone());
        let outcome = applier
            .apply(&ws, &scratch.path().join("none.patch"))
            .await
            .unwrap();
        assert_eq!(outcome, PatchOutcome::Absent);
        assert!(r.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_whitespace_patch_is_empty() {
        let (_repo, scratch, ws) = setup().await;
        let path = scratch.path().join("blank.patch");
        fs::write(&path, "  \n\t\n").unwrap();
        let applier = PatchApplier::new(Arc::new(runner(true, false)));
        assert_eq!(applier.apply(&ws, &path).await.unwrap(), PatchOutcome::Empty);
    }

    #[tokio::test]
    async fn test_clean_patch_is_applied_via_stdin() {
        let (_repo, scratch, ws) = setup().await;
        let path = scratch.path().join("test.patch");
        fs::write(&path, PATCH).unwrap();
        let r = Arc::new(runner(true, false));
        let applier = PatchApplier::new(r.clone());

        assert_eq!(applier.apply(&ws, &path).await.unwrap(), PatchOutcome::Applied);
        let calls = r.invocations();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec!["apply", "--check", "-"]);
        assert_eq!(calls[1].args, vec!["apply", "-"]);
        assert_eq!(calls[1].stdin.as_deref(), Some(PATCH.as_bytes()));
        assert_eq!(calls[1].cwd, ws.root());
    }

    #[tokio::test]
    async fn test_reverse_applicable_patch_is_already_applied() {
        let (_repo, scratch, ws) = setup().await;
        let path = scratch.path().join("test.patch");
        fs::write(&path, PATCH).unwrap();
        let r = Arc::new(runner(false, true));
        let applier = PatchApplier::new(r.clone());

        assert_eq!(
            applier.apply(&ws, &path).await.unwrap(),
            PatchOutcome::AlreadyApplied
        );
        assert_eq!(r.invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_conflicting_patch_reports_stderr() {
        let (_repo, scratch, ws) = setup().await;
        let path = scratch.path().join("test.patch");
        fs::write(&path, PATCH).unwrap();
        let applier = PatchApplier::new(Arc::new(runner(false, false)));

        let err = applier.apply(&ws, &path).await.unwrap_err();
        match &err {
            PatchApplyError::Conflict { stderr, .. } => assert!(stderr.contains("patch failed")),
            other => panic!("unexpected {:?}", other),
        }
        let report = PatchReport::from_result(PatchRole::Test, &path, &Err(err));
        assert!(report.outcome.is_none());
        assert!(report.error.unwrap().contains("does not apply"));
    }

    #[test]
    fn test_role_fatality() {
        assert!(PatchRole::Golden.is_fatal(PatchMode::Tolerant));
        assert!(!PatchRole::Test.is_fatal(PatchMode::Tolerant));
        assert!(PatchRole::Test.is_fatal(PatchMode::Strict));
    }
}
