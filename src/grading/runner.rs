//! Orchestration of a single grading run.
//!
//! `Workspace → AntiCheat → Patch → Build → Test → Aggregate → Score`.
//! [`GradingRunner::run_grading`] is total: every failure, including a panic
//! inside a stage, ends as a `(score, diagnostics)` pair.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::config::{ConfigError, GradingConfig};
use super::events::{EventLog, RunState, Stage};
use super::request::GradingRequest;
use crate::build::{BuildOutcome, BuildStage};
use crate::error::GradingError;
use crate::executor::{TestExecutor, TestRunOutcome};
use crate::guard::{AntiCheatGuard, RestoreStatus};
use crate::junit::{AggregatedResult, ResultAggregator};
use crate::metrics::MetricsCollector;
use crate::patch::{PatchApplier, PatchReport, PatchRole};
use crate::process::{truncate, ProcessRunner, TokioProcessRunner};
use crate::scoring::{Score, ScoreReason, ScoringEngine};
use crate::workspace::{Workspace, WorkspaceManager};

/// Error text reported when anti-cheat restoration aborts a run.
pub const ANTI_CHEAT_ERROR: &str = "Anti-Cheat test reset failed";
/// Error text reported when a panic is caught.
pub const INTERNAL_ERROR: &str = "Internal grading error";

const MAX_DETAILS_LEN: usize = 4000;

// ============================================================================
// Result types
// ============================================================================

/// Ordered key → JSON value map returned with every score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(BTreeMap<String, Value>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The `junit` entry, if present.
    pub fn junit(&self) -> Option<&str> {
        self.get("junit").and_then(Value::as_str)
    }

    /// The `reason` entry, if present.
    pub fn reason(&self) -> Option<&str> {
        self.get("reason").and_then(Value::as_str)
    }

    /// The `error` entry, if present.
    pub fn error(&self) -> Option<&str> {
        self.get("error").and_then(Value::as_str)
    }
}

/// Outcome of a grading run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub diagnostics: Diagnostics,
}

// ============================================================================
// Runner
// ============================================================================

/// Mutable state of one run, visible to the caller even after a panic.
struct RunContext {
    log: EventLog,
    diagnostics: Diagnostics,
    workspace: Option<Workspace>,
}

/// Runs the full grading pipeline.
pub struct GradingRunner {
    config: GradingConfig,
    workspaces: WorkspaceManager,
    guard: AntiCheatGuard,
    patches: PatchApplier,
    build: BuildStage,
    executor: TestExecutor,
    aggregator: ResultAggregator,
    scoring: ScoringEngine,
    metrics: MetricsCollector,
}

impl GradingRunner {
    /// Builds a runner after validating `config`.
    pub fn new(config: GradingConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = config.anti_cheat_policy()?;
        Ok(Self {
            workspaces: WorkspaceManager::new(config.scratch_root.clone()),
            guard: AntiCheatGuard::new(policy, config.reference_store.clone(), runner.clone()),
            patches: PatchApplier::new(runner.clone()),
            build: BuildStage::new(config.build.clone(), runner.clone()),
            executor: TestExecutor::new(config.tests.clone(), config.execution_strategy, runner),
            aggregator: ResultAggregator::new(),
            scoring: ScoringEngine::new(config.scoring_policy),
            metrics: MetricsCollector::new(),
            config,
        })
    }

    /// Runner backed by real processes.
    pub fn with_tokio_runner(config: GradingConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(TokioProcessRunner::new()))
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    /// Grades one request. Never fails and never panics outward.
    pub async fn run_grading(&self, request: &GradingRequest) -> ScoreResult {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        self.metrics.run_started();
        tracing::info!(run_id = %run_id, base = %request.base, test = %request.test, "Starting grading run");

        let mut ctx = RunContext {
            log: EventLog::new(run_id.to_string()),
            diagnostics: Diagnostics::new(),
            workspace: None,
        };

        let outcome = AssertUnwindSafe(self.grade(request, run_id, &mut ctx))
            .catch_unwind()
            .await;
        let score = match outcome {
            Ok(score) => score,
            Err(panic) => {
                let details = panic_message(panic.as_ref());
                ctx.log.fail(Stage::Score, format!("{}: {}", INTERNAL_ERROR, details));
                ctx.diagnostics.insert("error", INTERNAL_ERROR);
                ctx.diagnostics.insert("details", details);
                Score {
                    value: 0.0,
                    reason: ScoreReason::InternalError,
                }
            }
        };

        let result = self.finish(request, run_id, ctx, score).await;
        self.metrics.record_run(
            score.reason.as_str(),
            &self.scoring.policy().to_string(),
            result.score,
            start.elapsed().as_secs_f64(),
        );
        self.metrics.run_finished();
        tracing::info!(
            run_id = %run_id,
            score = result.score,
            reason = %score.reason,
            duration_ms = start.elapsed().as_millis() as u64,
            "Grading run finished"
        );
        result
    }

    async fn grade(&self, request: &GradingRequest, run_id: Uuid, ctx: &mut RunContext) -> Score {
        // --- Request ------------------------------------------------------
        if let Err(e) = request.validate() {
            return self.abort(ctx, Stage::Workspace, &e, e.to_string(), ScoreReason::InvalidRequest);
        }

        // --- Workspace ----------------------------------------------------
        let stage_start = Instant::now();
        let source = request
            .repo_path
            .clone()
            .unwrap_or_else(|| self.config.repo_path.clone());
        let ws = match self.workspaces.create_with_id(run_id, &source).await {
            Ok(ws) => ws,
            Err(e) => {
                let e = GradingError::from(e);
                return self.abort(ctx, Stage::Workspace, &e, e.to_string(), ScoreReason::WorkspaceSetupError);
            }
        };
        // Registered before any further stage so cleanup survives a panic.
        ctx.workspace = Some(ws.clone());
        ctx.log.info(
            Stage::Workspace,
            format!("Copied {} to {}", source.display(), ws.root().display()),
        );
        ctx.log.transition(Stage::Workspace, RunState::WorkspacePrepared);
        self.metrics.record_stage(Stage::Workspace.as_str(), stage_start.elapsed().as_secs_f64());

        // --- Anti-cheat ---------------------------------------------------
        let stage_start = Instant::now();
        let golden = request.golden.as_ref().map(|g| g.as_str());
        let report = self
            .guard
            .restore(&ws, golden, request.target_files.as_slice())
            .await;
        ctx.diagnostics.insert("anti_cheat", &report);
        match report.status {
            RestoreStatus::Skipped => ctx.log.error(
                Stage::AntiCheat,
                "No golden reference supplied, test files were not restored",
            ),
            RestoreStatus::Partial => ctx.log.warn(
                Stage::AntiCheat,
                format!("{} test file(s) could not be restored", report.failures.len()),
            ),
            RestoreStatus::Restored => ctx.log.info(
                Stage::AntiCheat,
                format!("Restored {} test file(s) from golden reference", report.restored.len()),
            ),
            RestoreStatus::NothingToRestore => {
                ctx.log.info(Stage::AntiCheat, "No target file matches the test policy")
            }
        }
        if report.is_fatal(self.config.anti_cheat_mode) {
            let e = GradingError::AntiCheatReset(report.failure_details());
            ctx.diagnostics.insert("error", ANTI_CHEAT_ERROR);
            ctx.diagnostics.insert("details", truncate(&report.failure_details(), MAX_DETAILS_LEN));
            ctx.log.fail(Stage::AntiCheat, e.to_string());
            return Score {
                value: 0.0,
                reason: ScoreReason::AntiCheatResetError,
            };
        }
        ctx.log.transition(Stage::AntiCheat, RunState::AntiCheatApplied);
        self.metrics.record_stage(Stage::AntiCheat.as_str(), stage_start.elapsed().as_secs_f64());

        // --- Patches ------------------------------------------------------
        let stage_start = Instant::now();
        let mut planned = Vec::new();
        if request.golden_check {
            planned.push((PatchRole::Golden, request.golden_patch_path.clone()));
        }
        planned.push((PatchRole::Test, request.test_patch_path.clone()));

        let mut reports = Vec::new();
        for (role, path) in planned {
            let result = self.patches.apply(&ws, &path).await;
            reports.push(PatchReport::from_result(role, &path, &result));
            match result {
                Ok(outcome) => ctx.log.info(
                    Stage::Patch,
                    format!("{} patch {}: {:?}", role, path.display(), outcome),
                ),
                Err(e) if role.is_fatal(self.config.patch_mode) => {
                    ctx.diagnostics.insert("patches", &reports);
                    let e = GradingError::from(e);
                    return self.abort(ctx, Stage::Patch, &e, e.to_string(), ScoreReason::PatchApplyError);
                }
                Err(e) => ctx.log.warn(
                    Stage::Patch,
                    format!("{} patch not applied, continuing: {}", role, e),
                ),
            }
        }
        ctx.diagnostics.insert("patches", &reports);
        ctx.log.transition(Stage::Patch, RunState::PatchApplied);
        self.metrics.record_stage(Stage::Patch.as_str(), stage_start.elapsed().as_secs_f64());

        // --- Build --------------------------------------------------------
        let stage_start = Instant::now();
        let built = self.build.run(&ws).await;
        ctx.diagnostics.insert("build", built.summary());
        self.metrics.record_stage(Stage::Build.as_str(), stage_start.elapsed().as_secs_f64());
        if let BuildOutcome::Failed { exit_code, document } = built {
            let e = GradingError::BuildFailure { exit_code };
            ctx.diagnostics.insert("junit", document.to_xml());
            ctx.diagnostics.insert("counts", document.counts());
            ctx.log.fail(Stage::Build, e.to_string());
            return self.scoring.build_failure();
        }
        ctx.log.transition(Stage::Build, RunState::Built);

        // --- Test ---------------------------------------------------------
        let stage_start = Instant::now();
        let run = self
            .executor
            .run(&ws, request.target_files.as_slice())
            .await;
        for summary in &run.scopes {
            self.metrics.record_scope(&summary.status.to_string());
        }
        ctx.diagnostics.insert("strategy", run.strategy);
        ctx.diagnostics.insert("scopes", &run.scopes);
        ctx.log.info(
            Stage::Test,
            format!("{} strategy, {} invocation(s)", run.strategy, run.scopes.len()),
        );
        ctx.log.transition(Stage::Test, RunState::Tested);
        self.metrics.record_stage(Stage::Test.as_str(), stage_start.elapsed().as_secs_f64());

        // --- Aggregate & score -------------------------------------------
        match run.outcome {
            TestRunOutcome::TimedOut {
                scope,
                timeout,
                document,
            } => {
                let e = GradingError::TestExecutionTimeout { scope: scope.clone(), timeout };
                let aggregated = self.aggregator.from_documents([(scope, document)]);
                self.record_aggregate(ctx, &aggregated);
                let score = self.scoring.evaluate(&aggregated);
                ctx.log.fail(Stage::Test, e.to_string());
                Score {
                    value: score.value,
                    reason: ScoreReason::TestTimeout,
                }
            }
            TestRunOutcome::Completed(documents) => {
                let aggregated = self.aggregator.aggregate(&documents);
                self.record_aggregate(ctx, &aggregated);
                ctx.log.transition(Stage::Aggregate, RunState::Aggregated);

                let score = self.scoring.evaluate(&aggregated);
                if score.reason == ScoreReason::ResultParseError {
                    let message = if aggregated.unparseable.is_empty() {
                        "Result counts overflow when aggregated".to_string()
                    } else {
                        let sources: Vec<_> = aggregated
                            .unparseable
                            .iter()
                            .map(|u| u.source.as_str())
                            .collect();
                        format!("Unparseable result document(s): {}", sources.join(", "))
                    };
                    ctx.log.fail(Stage::Aggregate, message);
                } else {
                    ctx.log.transition(Stage::Score, RunState::Scored);
                }
                score
            }
        }
    }

    fn record_aggregate(&self, ctx: &mut RunContext, aggregated: &AggregatedResult) {
        ctx.diagnostics.insert("junit", aggregated.document.to_xml());
        ctx.diagnostics.insert("counts", aggregated.counts());
        if !aggregated.unparseable.is_empty() {
            ctx.diagnostics.insert("unparseable", &aggregated.unparseable);
        }
    }

    fn abort(
        &self,
        ctx: &mut RunContext,
        stage: Stage,
        error: &GradingError,
        details: String,
        reason: ScoreReason,
    ) -> Score {
        let headline = match error {
            GradingError::WorkspaceSetup(_) => "Workspace setup failed",
            GradingError::PatchApply(_) => "Patch application failed",
            GradingError::InvalidRequest(_) => "Invalid grading request",
            _ => "Grading failed",
        };
        ctx.diagnostics.insert("error", headline);
        ctx.diagnostics.insert("details", truncate(&details, MAX_DETAILS_LEN));
        ctx.log.fail(stage, error.to_string());
        Score { value: 0.0, reason }
    }

    /// Fills the common diagnostics and disposes of the workspace.
    async fn finish(
        &self,
        request: &GradingRequest,
        run_id: Uuid,
        mut ctx: RunContext,
        score: Score,
    ) -> ScoreResult {
        if let Some(ws) = ctx.workspace.take() {
            if self.config.keep_workspace {
                ctx.diagnostics.insert("workspace", ws.root().display().to_string());
            } else {
                let root: PathBuf = ws.root().to_path_buf();
                if let Err(e) = ws.destroy().await {
                    ctx.log.warn(
                        Stage::Workspace,
                        format!("Failed to remove workspace {}: {}", root.display(), e),
                    );
                }
            }
        }

        let (state, stage) = match ctx.log.state() {
            RunState::Failed { stage, .. } => ("failed", stage.as_str()),
            other => (other.name(), Stage::Score.as_str()),
        };
        ctx.diagnostics.insert("run_id", run_id.to_string());
        ctx.diagnostics.insert("state", state);
        ctx.diagnostics.insert("stage", stage);
        ctx.diagnostics.insert("reason", score.reason);
        ctx.diagnostics.insert("policy", self.scoring.policy());
        ctx.diagnostics.insert("only_server", request.only_server);
        ctx.diagnostics.insert("events", ctx.log.to_json());

        ScoreResult {
            score: score.value.clamp(0.0, 1.0),
            diagnostics: ctx.diagnostics,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
