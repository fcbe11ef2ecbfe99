//! Test execution.
//!
//! The suite runs either as one whole-suite invocation or as an ordered set
//! of per-scope invocations, each with its own timeout and JUnit report. A
//! scope timeout voids the whole run: everything collected so far is
//! discarded and only a synthetic `TestTimeout` document is returned.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::build::CommandSpec;
use crate::junit::{RawDocument, TestResultDocument};
use crate::process::{Invocation, ProcessError, ProcessOutput, ProcessRunner};
use crate::workspace::Workspace;

pub mod scope;

pub use scope::{derive_scopes, report_file_name, sanitize_scope, TemplateVars};

/// Suite name of the synthetic document for a missing whole-suite report.
pub const CTEST_CRASH_SUITE: &str = "CTestCrash";
/// Suite name of the synthetic document for a scope that produced no report.
pub const SCOPE_CRASH_SUITE: &str = "TestCrash";
/// Suite name of the synthetic document for a timed out run.
pub const TIMEOUT_SUITE: &str = "TestTimeout";
/// Label of the whole-suite run in summaries.
pub const WHOLE_SUITE_SCOPE: &str = "whole_suite";

// ============================================================================
// Configuration
// ============================================================================

/// How the test suite is split into invocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Targeted when there are target files, whole otherwise.
    Auto,
    #[default]
    Whole,
    Targeted,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Whole => write!(f, "whole"),
            Self::Targeted => write!(f, "targeted"),
        }
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "whole" => Ok(Self::Whole),
            "targeted" => Ok(Self::Targeted),
            other => Err(format!(
                "unknown execution strategy '{}', expected auto, whole or targeted",
                other
            )),
        }
    }
}

impl ExecutionStrategy {
    /// Concrete strategy for a run. Never returns `Auto`.
    pub fn resolve(self, has_targets: bool) -> ExecutionStrategy {
        match self {
            Self::Auto | Self::Targeted if has_targets => Self::Targeted,
            _ => Self::Whole,
        }
    }
}

/// Test command settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    /// Whole-suite command.
    pub whole_suite: CommandSpec,
    /// Whole-suite JUnit report, relative to the workspace root.
    pub report_path: String,
    /// Whole-suite timeout; unset means the caller's outer timeout applies.
    pub whole_suite_timeout_secs: Option<u64>,
    /// Per-scope command template with `{scope}`, `{report}` and
    /// `{workspace}` placeholders. The default runs the CTest file CMake
    /// generates for the scope's build directory.
    pub targeted: CommandSpec,
    /// Directory for per-scope reports, relative to the workspace root.
    pub scope_report_dir: String,
    pub scope_timeout_secs: u64,
    pub scope_parallelism: usize,
    /// Directory always included as a scope when it exists.
    pub catch_all_dir: String,
}

impl Default for TestSettings {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            whole_suite: CommandSpec::new("ctest")
                .with_args([
                    "--output-junit".to_string(),
                    "junit_results.xml".to_string(),
                    "--output-on-failure".to_string(),
                    "-j".to_string(),
                    cpus.to_string(),
                ])
                .in_dir("build"),
            report_path: "build/junit_results.xml".to_string(),
            whole_suite_timeout_secs: None,
            targeted: CommandSpec::new("ctest").with_args([
                "--test-dir",
                "build/{scope}",
                "--output-junit",
                "{report}",
                "--output-on-failure",
            ]),
            scope_report_dir: ".grading_reports".to_string(),
            scope_timeout_secs: 600,
            scope_parallelism: 1,
            catch_all_dir: "tests".to_string(),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStatus {
    Passed,
    Failed,
    Crashed,
    TimedOut,
}

impl std::fmt::Display for ScopeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Crashed => write!(f, "crashed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Summary of one test invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSummary {
    pub scope: String,
    pub status: ScopeStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub report: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestRunOutcome {
    /// Every invocation finished. Documents are in scope order.
    Completed(Vec<RawDocument>),
    /// A deadline expired; prior documents were discarded.
    TimedOut {
        scope: String,
        timeout: Duration,
        document: TestResultDocument,
    },
}

/// Everything the test stage produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRun {
    /// Strategy actually used; `Whole` or `Targeted`.
    pub strategy: ExecutionStrategy,
    pub scopes: Vec<ScopeSummary>,
    pub outcome: TestRunOutcome,
}

enum ScopeResult {
    Finished(ScopeSummary, RawDocument),
    TimedOut(ScopeSummary, Duration),
}

// ============================================================================
// Executor
// ============================================================================

/// Runs the test suite of a workspace.
pub struct TestExecutor {
    settings: TestSettings,
    strategy: ExecutionStrategy,
    runner: Arc<dyn ProcessRunner>,
}

impl TestExecutor {
    pub fn new(
        settings: TestSettings,
        strategy: ExecutionStrategy,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            settings,
            strategy,
            runner,
        }
    }

    pub async fn run(&self, workspace: &Workspace, targets: &[String]) -> TestRun {
        match self.strategy.resolve(!targets.is_empty()) {
            ExecutionStrategy::Targeted => {
                let scopes = derive_scopes(workspace.root(), targets, &self.settings.catch_all_dir);
                if scopes.is_empty() {
                    tracing::info!("No existing scope for the target files, running whole suite");
                    self.run_whole(workspace).await
                } else {
                    self.run_targeted(workspace, &scopes).await
                }
            }
            _ => self.run_whole(workspace).await,
        }
    }

    async fn run_whole(&self, workspace: &Workspace) -> TestRun {
        let report = workspace.path(&self.settings.report_path);
        remove_stale(&report).await;

        let mut invocation = self.settings.whole_suite.invocation(workspace.root());
        let timeout = self.settings.whole_suite_timeout_secs.map(Duration::from_secs);
        if let Some(limit) = timeout {
            invocation = invocation.timeout(limit);
        }
        tracing::info!(command = %invocation.display(), "Running whole test suite");

        let start = Instant::now();
        let result = self.runner.run(&invocation).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (summary, outcome) = match result {
            Err(ProcessError::Timeout { timeout, .. }) => {
                let summary = ScopeSummary {
                    scope: WHOLE_SUITE_SCOPE.to_string(),
                    status: ScopeStatus::TimedOut,
                    exit_code: None,
                    duration_ms,
                    report: self.settings.report_path.clone(),
                };
                (summary, timed_out(WHOLE_SUITE_SCOPE, timeout))
            }
            other => {
                let (status, exit_code, doc) = collect_report(
                    &report,
                    WHOLE_SUITE_SCOPE,
                    CTEST_CRASH_SUITE,
                    "CTest failed to generate XML",
                    other,
                )
                .await;
                let summary = ScopeSummary {
                    scope: WHOLE_SUITE_SCOPE.to_string(),
                    status,
                    exit_code,
                    duration_ms,
                    report: self.settings.report_path.clone(),
                };
                (summary, TestRunOutcome::Completed(vec![doc]))
            }
        };

        TestRun {
            strategy: ExecutionStrategy::Whole,
            scopes: vec![summary],
            outcome,
        }
    }

    async fn run_targeted(&self, workspace: &Workspace, scopes: &[String]) -> TestRun {
        let report_dir = workspace.path(&self.settings.scope_report_dir);
        if let Err(e) = tokio::fs::create_dir_all(&report_dir).await {
            tracing::warn!(dir = %report_dir.display(), error = %e, "Cannot create report directory");
        }
        tracing::info!(scopes = scopes.len(), "Running targeted tests");

        let parallelism = self.settings.scope_parallelism.max(1);
        let mut results = stream::iter(
            scopes
                .iter()
                .enumerate()
                .map(|(index, scope)| self.run_scope(workspace, index, scope)),
        )
        .buffered(parallelism);

        let mut summaries = Vec::with_capacity(scopes.len());
        let mut documents = Vec::with_capacity(scopes.len());
        while let Some(result) = results.next().await {
            match result {
                ScopeResult::Finished(summary, doc) => {
                    summaries.push(summary);
                    documents.push(doc);
                }
                ScopeResult::TimedOut(summary, timeout) => {
                    // Dropping the stream cancels and kills in-flight scopes.
                    drop(results);
                    let scope = summary.scope.clone();
                    tracing::warn!(
                        scope = %scope,
                        discarded = documents.len(),
                        "Scope timed out, voiding test run"
                    );
                    summaries.push(summary);
                    return TestRun {
                        strategy: ExecutionStrategy::Targeted,
                        scopes: summaries,
                        outcome: timed_out(&scope, timeout),
                    };
                }
            }
        }

        TestRun {
            strategy: ExecutionStrategy::Targeted,
            scopes: summaries,
            outcome: TestRunOutcome::Completed(documents),
        }
    }

    async fn run_scope(&self, workspace: &Workspace, index: usize, scope: &str) -> ScopeResult {
        let relative_report = Path::new(&self.settings.scope_report_dir)
            .join(report_file_name(index, scope))
            .to_string_lossy()
            .to_string();
        let report = workspace.path(&relative_report);
        remove_stale(&report).await;

        let report_str = report.to_string_lossy().to_string();
        let root_str = workspace.root().to_string_lossy().to_string();
        let vars = TemplateVars {
            scope,
            report: &report_str,
            workspace: &root_str,
        };
        let invocation = expand_command(&self.settings.targeted, workspace.root(), &vars)
            .timeout(Duration::from_secs(self.settings.scope_timeout_secs));

        tracing::debug!(scope, command = %invocation.display(), "Running scope");
        let start = Instant::now();
        let result = self.runner.run(&invocation).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        if let Err(ProcessError::Timeout { timeout, .. }) = &result {
            let summary = ScopeSummary {
                scope: scope.to_string(),
                status: ScopeStatus::TimedOut,
                exit_code: None,
                duration_ms,
                report: relative_report,
            };
            return ScopeResult::TimedOut(summary, *timeout);
        }

        let message = format!("No test report produced for scope '{}'", scope);
        let (status, exit_code, doc) =
            collect_report(&report, scope, SCOPE_CRASH_SUITE, &message, result).await;
        tracing::info!(scope, status = %status, duration_ms, "Scope finished");

        ScopeResult::Finished(
            ScopeSummary {
                scope: scope.to_string(),
                status,
                exit_code,
                duration_ms,
                report: relative_report,
            },
            doc,
        )
    }
}

fn expand_command(spec: &CommandSpec, root: &Path, vars: &TemplateVars<'_>) -> Invocation {
    let cwd = match &spec.working_dir {
        Some(dir) => root.join(vars.expand(dir)),
        None => root.to_path_buf(),
    };
    Invocation::new(vars.expand(&spec.program), cwd).args(spec.args.iter().map(|a| vars.expand(a)))
}

/// Reads the report written by a finished invocation, or builds a crash
/// document when there is none.
async fn collect_report(
    report: &Path,
    source: &str,
    crash_suite: &str,
    crash_message: &str,
    result: Result<ProcessOutput, ProcessError>,
) -> (ScopeStatus, Option<i32>, RawDocument) {
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(scope = source, error = %e, "Test command could not run");
            let doc = TestResultDocument::synthetic(crash_suite, crash_message, "", &e.to_string());
            return (ScopeStatus::Crashed, None, RawDocument::new(source, doc.to_xml()));
        }
    };

    match tokio::fs::read(report).await {
        Ok(bytes) => {
            let status = if output.success() {
                ScopeStatus::Passed
            } else {
                ScopeStatus::Failed
            };
            let xml = String::from_utf8_lossy(&bytes).into_owned();
            (status, Some(output.exit_code), RawDocument::new(source, xml))
        }
        Err(_) => {
            tracing::warn!(scope = source, report = %report.display(), "Test report missing");
            let doc = TestResultDocument::synthetic(
                crash_suite,
                crash_message,
                &output.stdout_lossy(),
                &output.stderr_lossy(),
            );
            (
                ScopeStatus::Crashed,
                Some(output.exit_code),
                RawDocument::new(source, doc.to_xml()),
            )
        }
    }
}

fn timed_out(scope: &str, timeout: Duration) -> TestRunOutcome {
    let message = format!("Test scope '{}' timed out after {}s", scope, timeout.as_secs());
    TestRunOutcome::TimedOut {
        scope: scope.to_string(),
        timeout,
        document: TestResultDocument::synthetic(TIMEOUT_SUITE, &message, "", ""),
    }
}

async fn remove_stale(report: &Path) {
    match tokio::fs::remove_file(report).await {
        Ok(()) => tracing::debug!(report = %report.display(), "Removed stale report"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(report = %report.display(), error = %e, "Cannot remove stale report"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::junit::ResultAggregator;
    use crate::process::ScriptedRunner;
    use crate::workspace::WorkspaceManager;
    use std::fs;
    use tempfile::TempDir;

    async fn workspace(scratch: &TempDir, dirs: &[&str]) -> Workspace {
        let repo = TempDir::new().unwrap();
        for d in dirs {
            fs::create_dir_all(repo.path().join(d)).unwrap();
        }
        WorkspaceManager::new(scratch.path())
            .create(repo.path())
            .await
            .unwrap()
    }

    fn suite(name: &str, tests: u64, failures: u64) -> String {
        format!(
            r#"<testsuites><testsuite name="{}" tests="{}" failures="{}" errors="0"/></testsuites>"#,
            name, tests, failures
        )
    }

    /// Writes `<report>` for every scope; the body is chosen by the scope.
    fn report_writer<F>(body: F) -> ScriptedRunner
    where
        F: Fn(&str) -> Result<(String, i32), ProcessError> + Send + Sync + 'static,
    {
        ScriptedRunner::new(move |inv| {
            let report = inv.args[3].clone();
            let scope = inv.args[1].trim_start_matches("build/").to_string();
            let (xml, code) = body(&scope)?;
            if !xml.is_empty() {
                fs::write(&report, xml).unwrap();
            }
            Ok(ProcessOutput::new(code, Vec::new(), Vec::new()))
        })
    }

    #[test]
    fn test_strategy_resolution() {
        assert_eq!(ExecutionStrategy::Auto.resolve(true), ExecutionStrategy::Targeted);
        assert_eq!(ExecutionStrategy::Auto.resolve(false), ExecutionStrategy::Whole);
        assert_eq!(ExecutionStrategy::Targeted.resolve(false), ExecutionStrategy::Whole);
        assert_eq!(ExecutionStrategy::default(), ExecutionStrategy::Whole);
        assert_eq!(ExecutionStrategy::Whole.resolve(true), ExecutionStrategy::Whole);
        assert_eq!("targeted".parse::<ExecutionStrategy>().unwrap(), ExecutionStrategy::Targeted);
    }

    #[tokio::test]
    async fn test_whole_suite_reads_report_and_removes_stale() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch, &["build"]).await;
        fs::write(ws.path("build/junit_results.xml"), "stale").unwrap();

        let runner = Arc::new(ScriptedRunner::new(|inv| {
            assert!(!inv.cwd.join("junit_results.xml").exists());
            fs::write(inv.cwd.join("junit_results.xml"), suite("ctest", 4, 1)).unwrap();
            Ok(ProcessOutput::failed(8, "1 test failed"))
        }));
        let executor = TestExecutor::new(TestSettings::default(), ExecutionStrategy::Auto, runner.clone());
        let run = executor.run(&ws, &[]).await;

        assert_eq!(run.strategy, ExecutionStrategy::Whole);
        assert_eq!(run.scopes[0].status, ScopeStatus::Failed);
        assert_eq!(runner.invocations()[0].program, "ctest");
        match run.outcome {
            TestRunOutcome::Completed(docs) => {
                let agg = ResultAggregator::new().aggregate(&docs);
                assert_eq!(agg.counts().total, 4);
                assert_eq!(agg.counts().failures, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_whole_suite_missing_report_is_ctest_crash() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch, &["build"]).await;
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(ProcessOutput::new(1, "out", "segfault"))));
        let executor = TestExecutor::new(TestSettings::default(), ExecutionStrategy::Whole, runner);
        let run = executor.run(&ws, &["src/a.cpp".to_string()]).await;

        assert_eq!(run.scopes[0].status, ScopeStatus::Crashed);
        match run.outcome {
            TestRunOutcome::Completed(docs) => {
                let doc = TestResultDocument::parse(&docs[0].xml).unwrap();
                assert_eq!(doc.suites[0].name, CTEST_CRASH_SUITE);
                assert_eq!(doc.suites[0].testcases[0].system_err.as_deref(), Some("segfault"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_whole_suite_timeout_when_configured() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch, &["build"]).await;
        let runner = Arc::new(ScriptedRunner::new(|inv| {
            Err(ProcessError::Timeout {
                command: inv.display(),
                timeout: inv.timeout.unwrap(),
            })
        }));
        let settings = TestSettings {
            whole_suite_timeout_secs: Some(30),
            ..Default::default()
        };
        let executor = TestExecutor::new(settings, ExecutionStrategy::Whole, runner.clone());
        let run = executor.run(&ws, &[]).await;

        assert_eq!(runner.invocations()[0].timeout, Some(Duration::from_secs(30)));
        assert!(matches!(run.outcome, TestRunOutcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_targeted_runs_scopes_in_order() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch, &["pkg/b", "pkg/a", "tests"]).await;
        let runner = Arc::new(report_writer(|scope| match scope {
            "pkg/a" => Ok((suite("a", 5, 0), 0)),
            "pkg/b" => Ok((suite("b", 5, 5), 1)),
            _ => Ok((suite("tests", 2, 0), 0)),
        }));
        let executor = TestExecutor::new(TestSettings::default(), ExecutionStrategy::Auto, runner.clone());
        let targets = vec!["pkg/b/x.cc".to_string(), "pkg/a/y.cc".to_string()];
        let run = executor.run(&ws, &targets).await;

        assert_eq!(run.strategy, ExecutionStrategy::Targeted);
        let scopes: Vec<_> = run.scopes.iter().map(|s| s.scope.as_str()).collect();
        assert_eq!(scopes, vec!["pkg/a", "pkg/b", "tests"]);
        assert_eq!(run.scopes[1].status, ScopeStatus::Failed);
        assert_eq!(run.scopes[0].report, ".grading_reports/000-pkg_a.xml");

        let dirs: Vec<_> = runner.invocations().iter().map(|c| c.args[1].clone()).collect();
        assert_eq!(dirs, vec!["build/pkg/a", "build/pkg/b", "build/tests"]);
        for call in runner.invocations() {
            assert_eq!(call.program, "ctest");
            assert_eq!(call.timeout, Some(Duration::from_secs(600)));
        }
        match run.outcome {
            TestRunOutcome::Completed(docs) => {
                let sources: Vec<_> = docs.iter().map(|d| d.source.as_str()).collect();
                assert_eq!(sources, vec!["pkg/a", "pkg/b", "tests"]);
                let agg = ResultAggregator::new().aggregate(&docs);
                assert_eq!(agg.counts().total, 12);
                assert_eq!(agg.counts().failures, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_targeted_timeout_discards_collected_documents() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch, &["pkg/a", "pkg/b", "pkg/c"]).await;
        let runner = Arc::new(report_writer(|scope| match scope {
            "pkg/b" => Err(ProcessError::Timeout {
                command: "ctest".into(),
                timeout: Duration::from_secs(600),
            }),
            _ => Ok((suite(scope, 5, 0), 0)),
        }));
        let executor = TestExecutor::new(TestSettings::default(), ExecutionStrategy::Targeted, runner.clone());
        let targets = vec![
            "pkg/a/x.go".to_string(),
            "pkg/b/x.go".to_string(),
            "pkg/c/x.go".to_string(),
        ];
        let run = executor.run(&ws, &targets).await;

        match run.outcome {
            TestRunOutcome::TimedOut { scope, document, .. } => {
                assert_eq!(scope, "pkg/b");
                assert_eq!(document.suites.len(), 1);
                assert_eq!(document.suites[0].name, TIMEOUT_SUITE);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(run.scopes.len(), 2);
        assert_eq!(run.scopes[1].status, ScopeStatus::TimedOut);
        assert_eq!(runner.invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_targeted_missing_report_is_scope_crash() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch, &["pkg/a"]).await;
        let runner = Arc::new(report_writer(|_| Ok((String::new(), 2))));
        let executor = TestExecutor::new(TestSettings::default(), ExecutionStrategy::Targeted, runner);
        let run = executor.run(&ws, &["pkg/a/x.go".to_string()]).await;

        assert_eq!(run.scopes[0].status, ScopeStatus::Crashed);
        match run.outcome {
            TestRunOutcome::Completed(docs) => {
                let doc = TestResultDocument::parse(&docs[0].xml).unwrap();
                assert_eq!(doc.suites[0].name, SCOPE_CRASH_SUITE);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parallel_scopes_keep_scope_order() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch, &["a", "b", "c", "d"]).await;
        let runner = Arc::new(report_writer(|scope| Ok((suite(scope, 1, 0), 0))));
        let settings = TestSettings {
            scope_parallelism: 3,
            catch_all_dir: String::new(),
            ..Default::default()
        };
        let executor = TestExecutor::new(settings, ExecutionStrategy::Targeted, runner);
        let targets: Vec<String> = ["d/x", "c/x", "b/x", "a/x"].iter().map(|s| s.to_string()).collect();
        let run = executor.run(&ws, &targets).await;

        match run.outcome {
            TestRunOutcome::Completed(docs) => {
                let sources: Vec<_> = docs.iter().map(|d| d.source.as_str()).collect();
                assert_eq!(sources, vec!["a", "b", "c", "d"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_targeted_without_existing_scopes_falls_back_to_whole() {
        let scratch = TempDir::new().unwrap();
        let ws = workspace(&scratch, &["build"]).await;
        let runner = Arc::new(ScriptedRunner::succeeding());
        let settings = TestSettings {
            catch_all_dir: String::new(),
            ..Default::default()
        };
        let executor = TestExecutor::new(settings, ExecutionStrategy::Targeted, runner.clone());
        let run = executor.run(&ws, &["gone/x.go".to_string()]).await;
        assert_eq!(run.strategy, ExecutionStrategy::Whole);
        assert_eq!(runner.invocations()[0].program, "ctest");
    }
}
