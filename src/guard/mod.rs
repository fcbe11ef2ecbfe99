//! Anti-cheat restoration of test files.
//!
//! Before a submission is built, every target path that looks like a test
//! is overwritten with its content at the golden reference. Content is read
//! from a read-only reference object store, never from the workspace's own
//! `.git`, so history rewritten by the agent cannot leak in.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::process::{validate_git_ref, validate_relative_path, Invocation, ProcessRunner};
use crate::workspace::Workspace;

/// Whether restoration problems abort the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiCheatMode {
    /// Record failures in diagnostics and keep grading.
    #[default]
    Tolerant,
    /// Any failure, or a missing golden reference, scores the run 0.0.
    Strict,
}

impl std::fmt::Display for AntiCheatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tolerant => write!(f, "tolerant"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for AntiCheatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tolerant" => Ok(Self::Tolerant),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown mode '{}', expected strict or tolerant", other)),
        }
    }
}

/// Decides which target paths are test artifacts.
#[derive(Debug, Clone)]
pub struct AntiCheatPolicy {
    prefixes: Vec<String>,
    pattern: Regex,
}

impl AntiCheatPolicy {
    /// Builds a policy from directory prefixes and a file-name pattern.
    pub fn new(prefixes: Vec<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            prefixes,
            pattern: Regex::new(pattern)?,
        })
    }

    /// A path matches when it starts with a test prefix or its lowercase form
    /// matches the pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
            || self.pattern.is_match(&path.to_lowercase())
    }

    /// Matching paths, in input order.
    pub fn select<'a>(&self, targets: &'a [String]) -> Vec<&'a str> {
        targets
            .iter()
            .map(String::as_str)
            .filter(|path| self.matches(path))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    /// No golden reference was supplied.
    Skipped,
    /// Every selected path was restored.
    Restored,
    /// At least one selected path could not be restored.
    Partial,
    /// No target path matched the policy.
    NothingToRestore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredFile {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of one restoration pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub status: RestoreStatus,
    pub restored: Vec<RestoredFile>,
    pub failures: Vec<RestoreFailure>,
}

impl RestoreReport {
    fn empty(status: RestoreStatus) -> Self {
        Self {
            status,
            restored: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Whether this report aborts the run under `mode`.
    pub fn is_fatal(&self, mode: AntiCheatMode) -> bool {
        mode == AntiCheatMode::Strict
            && matches!(self.status, RestoreStatus::Skipped | RestoreStatus::Partial)
    }

    /// Human-readable summary of the failures.
    pub fn failure_details(&self) -> String {
        match self.status {
            RestoreStatus::Skipped => "no golden reference supplied".to_string(),
            _ => self
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.path, f.reason))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Restores test files from the golden reference.
pub struct AntiCheatGuard {
    policy: AntiCheatPolicy,
    reference_store: Option<PathBuf>,
    runner: Arc<dyn ProcessRunner>,
}

impl AntiCheatGuard {
    pub fn new(
        policy: AntiCheatPolicy,
        reference_store: Option<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            policy,
            reference_store,
            runner,
        }
    }

    /// Overwrites every matching target with its golden content.
    ///
    /// Running this twice with the same golden reference leaves the files
    /// byte-identical to running it once.
    pub async fn restore(
        &self,
        workspace: &Workspace,
        golden: Option<&str>,
        targets: &[String],
    ) -> RestoreReport {
        let golden = match golden {
            Some(g) => g,
            None => {
                tracing::warn!("No golden reference, skipping anti-cheat restoration");
                return RestoreReport::empty(RestoreStatus::Skipped);
            }
        };

        let selected = self.policy.select(targets);
        if selected.is_empty() {
            return RestoreReport::empty(RestoreStatus::NothingToRestore);
        }

        let mut report = RestoreReport::empty(RestoreStatus::Restored);
        for path in selected {
            match self.restore_one(workspace, golden, path).await {
                Ok(sha256) => {
                    tracing::debug!(path, sha256 = %sha256, "Restored test file");
                    report.restored.push(RestoredFile {
                        path: path.to_string(),
                        sha256,
                    });
                }
                Err(reason) => {
                    tracing::warn!(path, reason = %reason, "Failed to restore test file");
                    report.failures.push(RestoreFailure {
                        path: path.to_string(),
                        reason,
                    });
                }
            }
        }
        if !report.failures.is_empty() {
            report.status = RestoreStatus::Partial;
        }
        report
    }

    async fn restore_one(
        &self,
        workspace: &Workspace,
        golden: &str,
        path: &str,
    ) -> Result<String, String> {
        let store = self
            .reference_store
            .as_ref()
            .ok_or_else(|| "reference store not configured".to_string())?;
        validate_git_ref(golden)?;
        validate_relative_path(path)?;

        let blob = self.read_blob(store, workspace.root(), golden, path).await?;
        let expected = sha256_hex(&blob);

        let target = workspace.path(path);
        ensure_inside(workspace.root(), &target).await?;

        if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
            if meta.file_type().is_symlink() {
                tokio::fs::remove_file(&target)
                    .await
                    .map_err(|e| format!("cannot remove symlink: {}", e))?;
            }
        }

        tokio::fs::write(&target, &blob)
            .await
            .map_err(|e| format!("write failed: {}", e))?;
        let written = tokio::fs::read(&target)
            .await
            .map_err(|e| format!("read-back failed: {}", e))?;
        let actual = sha256_hex(&written);
        if actual != expected {
            return Err(format!(
                "checksum mismatch after write (expected {}, got {})",
                expected, actual
            ));
        }
        Ok(actual)
    }

    async fn read_blob(
        &self,
        store: &Path,
        cwd: &Path,
        golden: &str,
        path: &str,
    ) -> Result<Vec<u8>, String> {
        let invocation = Invocation::new("git", cwd)
            .arg("--git-dir")
            .arg(store.display().to_string())
            .args(["cat-file", "blob"])
            .arg(format!("{}:{}", golden, path));
        let output = self
            .runner
            .run(&invocation)
            .await
            .map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!(
                "not readable at golden reference: {}",
                output.stderr_lossy().trim()
            ));
        }
        Ok(output.stdout)
    }
}

/// Creates the parent directory of `target` and checks it resolves inside `root`.
async fn ensure_inside(root: &Path, target: &Path) -> Result<(), String> {
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| format!("cannot resolve workspace root: {}", e))?;
    let parent = target
        .parent()
        .ok_or_else(|| "target has no parent directory".to_string())?;

    // Check the deepest existing ancestor before creating anything.
    let mut existing = parent.to_path_buf();
    while !existing.exists() {
        match existing.parent() {
            Some(up) => existing = up.to_path_buf(),
            None => break,
        }
    }
    let resolved = tokio::fs::canonicalize(&existing)
        .await
        .map_err(|e| format!("cannot resolve parent: {}", e))?;
    if !resolved.starts_with(&root) {
        return Err("path escapes the workspace".to_string());
    }

    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| format!("cannot create parent directory: {}", e))?;
    let resolved = tokio::fs::canonicalize(parent)
        .await
        .map_err(|e| format!("cannot resolve parent: {}", e))?;
    if !resolved.starts_with(&root) {
        return Err("path escapes the workspace".to_string());
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
