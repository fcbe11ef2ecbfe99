//! External process execution.
//!
//! Every tool the grading pipeline shells out to (git, the build tool, the
//! test runner) goes through the [`ProcessRunner`] trait so stages can be
//! exercised with a scripted runner instead of a real toolchain.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub mod scripted;

pub use scripted::ScriptedRunner;

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Bytes written to stdin before it is closed. `None` attaches /dev/null.
    pub stdin: Option<Vec<u8>>,
    /// Wall-clock limit. `None` means the caller's outer timeout applies.
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Creates an invocation of `program` in `cwd` with no arguments.
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            stdin: None,
            timeout: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feeds `bytes` to the child's stdin.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Sets the wall-clock limit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human-readable command line, used in logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; -1 when the process was terminated by a signal.
    pub exit_code: i32,
    /// Raw stdout.
    pub stdout: Vec<u8>,
    /// Raw stderr.
    pub stderr: Vec<u8>,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl ProcessOutput {
    /// Builds an output from its parts with a zero duration.
    pub fn new(exit_code: i32, stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self::new(0, stdout, Vec::new())
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self::new(exit_code, Vec::new(), stderr)
    }

    /// Whether the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout decoded lossily as UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Stderr decoded lossily as UTF-8.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Errors raised while running an external process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Capability to run an external program and capture its output.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the invocation to completion (or until its timeout expires).
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
///
/// Children are spawned with `kill_on_drop`, so a timed out or cancelled
/// invocation never outlives its future.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    /// Creates a new runner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        let command_line = invocation.display();
        let start = Instant::now();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if invocation.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        if let (Some(bytes), Some(mut handle)) = (invocation.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if !bytes.is_empty() {
                    let _ = handle.write_all(&bytes).await;
                }
                let _ = handle.shutdown().await;
            });
        }

        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ProcessError::Timeout {
                    command: command_line.clone(),
                    timeout: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ProcessError::Io {
            command: command_line.clone(),
            source,
        })?;

        let duration = start.elapsed();
        tracing::debug!(
            command = %command_line,
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms = duration.as_millis() as u64,
            "Process finished"
        );

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
        })
    }
}

/// Validate a git ref (commit SHA, branch name) before it reaches a command line.
///
/// Accepts hex SHAs and standard ref names (alphanumeric, `/`, `.`, `-`, `_`,
/// `~`, `^`). Rejects `..` sequences and refs starting with `-`.
pub fn validate_git_ref(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("git ref is empty".to_string());
    }
    if s.len() > 256 {
        return Err(format!("git ref too long ({} chars, max 256)", s.len()));
    }
    if s.starts_with('-') {
        return Err(format!(
            "git ref '{}' must not start with '-' (could be interpreted as a flag)",
            s
        ));
    }
    if s.contains("..") {
        return Err(format!("git ref '{}' must not contain '..'", s));
    }
    if let Some(ch) = s
        .chars()
        .find(|ch| !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '/' | '.' | '-' | '_' | '~' | '^'))
    {
        return Err(format!("invalid character '{}' in git ref '{}'", ch, s));
    }
    Ok(())
}

/// Validate a repository-relative file path.
///
/// Rejects empty and absolute paths, null bytes, and `..` components.
pub fn validate_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("file path is empty".to_string());
    }
    if path.len() > 4096 {
        return Err(format!("file path too long ({} chars, max 4096)", path.len()));
    }
    if path.contains('\0') {
        return Err("file path contains null byte".to_string());
    }
    if Path::new(path).is_absolute() || path.starts_with('/') {
        return Err(format!("file path '{}' must be relative", path));
    }
    if path.split(['/', '\\']).any(|part| part == "..") {
        return Err(format!("file path '{}' contains '..'", path));
    }
    Ok(())
}

/// Truncate `s` to at most `max` bytes on a char boundary.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let inv = Invocation::new("git", "/tmp/ws")
            .arg("apply")
            .args(["--check", "-"])
            .stdin(b"diff".to_vec())
            .timeout(Duration::from_secs(5));
        assert_eq!(inv.args, vec!["apply", "--check", "-"]);
        assert_eq!(inv.display(), "git apply --check -");
        assert_eq!(inv.stdin.as_deref(), Some(&b"diff"[..]));
        assert_eq!(inv.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_output_helpers() {
        let ok = ProcessOutput::ok("hello");
        assert!(ok.success());
        assert_eq!(ok.stdout_lossy(), "hello");

        let failed = ProcessOutput::failed(2, "boom");
        assert!(!failed.success());
        assert_eq!(failed.stderr_lossy(), "boom");
    }

    #[test]
    fn test_validate_git_ref() {
        assert!(validate_git_ref("abc1234").is_ok());
        assert!(validate_git_ref("origin/main").is_ok());
        assert!(validate_git_ref("HEAD~1").is_ok());
        assert!(validate_git_ref("").is_err());
        assert!(validate_git_ref("--upload-pack=evil").is_err());
        assert!(validate_git_ref("a..b").is_err());
        assert!(validate_git_ref("abc;rm").is_err());
    }

    #[test]
    fn test_validate_relative_path() {
        assert!(validate_relative_path("tests/foo_test.go").is_ok());
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("tests/../../etc").is_err());
        assert!(validate_relative_path("a\0b").is_err());
        assert!(validate_relative_path("tests/..hidden").is_ok());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert!(truncate("hello world", 5).ends_with("... [truncated]"));
        assert!(truncate("héllo wörld", 2).ends_with("... [truncated]"));
    }

    #[tokio::test]
    async fn test_tokio_runner_captures_output() {
        let runner = TokioProcessRunner::new();
        let inv = Invocation::new("echo", std::env::temp_dir()).arg("hello");
        let output = runner.run(&inv).await.expect("echo should run");
        assert!(output.success());
        assert!(output.stdout_lossy().contains("hello"));
    }

    #[tokio::test]
    async fn test_tokio_runner_feeds_stdin() {
        let runner = TokioProcessRunner::new();
        let inv = Invocation::new("cat", std::env::temp_dir()).stdin(b"piped input".to_vec());
        let output = runner.run(&inv).await.expect("cat should run");
        assert_eq!(output.stdout_lossy(), "piped input");
    }

    #[tokio::test]
    async fn test_tokio_runner_nonzero_exit() {
        let runner = TokioProcessRunner::new();
        let inv = Invocation::new("false", std::env::temp_dir());
        let output = runner.run(&inv).await.expect("false should run");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_tokio_runner_timeout() {
        let runner = TokioProcessRunner::new();
        let inv = Invocation::new("sleep", std::env::temp_dir())
            .arg("5")
            .timeout(Duration::from_millis(100));
        let err = runner.run(&inv).await.expect_err("sleep should time out");
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_tokio_runner_spawn_error() {
        let runner = TokioProcessRunner::new();
        let inv = Invocation::new("definitely-not-a-real-binary-xyz", std::env::temp_dir());
        let err = runner.run(&inv).await.expect_err("spawn should fail");
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
