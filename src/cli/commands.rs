//! CLI command definitions for swe-grade.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use crate::executor::ExecutionStrategy;
use crate::grading::{load_tasks, run_batch, GradingConfig, GradingRequest, GradingRunner, ScoreResult};
use crate::junit::{RawDocument, ResultAggregator};
use crate::metrics::{export_metrics, init_metrics};
use crate::scoring::{ScoringEngine, ScoringPolicy};

/// Grade software-engineering task submissions.
#[derive(Parser)]
#[command(name = "swe-grade")]
#[command(about = "Grade SWE task submissions by building and testing them in isolated workspaces")]
#[command(version)]
#[command(
    long_about = "swe-grade copies a reference repository into an isolated workspace, restores hidden tests from the golden reference, applies patches, builds, runs the tests and reduces the JUnit results to a score in [0, 1].\n\nExample usage:\n  swe-grade grade --base abc123 --test def456 --golden def456 --target-file tests/test_core.cpp --json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Grade one submission.
    Grade(GradeArgs),

    /// Aggregate and score existing JUnit files without running anything.
    Score(ScoreArgs),

    /// Grade every task of a JSON or YAML task file.
    Batch(BatchArgs),
}

/// Arguments for `swe-grade grade`.
#[derive(Parser, Debug)]
pub struct GradeArgs {
    /// Pre-fix commit.
    #[arg(long)]
    pub base: String,

    /// Commit used for validation.
    #[arg(long)]
    pub test: String,

    /// Golden reference commit used to restore test files.
    #[arg(long)]
    pub golden: Option<String>,

    /// Files the task touches. Repeatable.
    #[arg(long = "target-file")]
    pub target_files: Vec<String>,

    /// Supplementary test patch.
    #[arg(long)]
    pub test_patch: Option<PathBuf>,

    /// Golden patch, applied with --golden-check.
    #[arg(long)]
    pub golden_patch: Option<PathBuf>,

    #[arg(long)]
    pub only_server: bool,

    /// Apply the golden patch before the test patch to validate the task.
    #[arg(long)]
    pub golden_check: bool,

    /// Reference repository (overrides the configuration).
    #[arg(long)]
    pub repo_path: Option<PathBuf>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Configuration flags shared by `grade` and `batch`.
#[derive(clap::Args, Debug)]
pub struct PipelineArgs {
    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Scoring policy (graduated, binary).
    #[arg(long)]
    pub policy: Option<ScoringPolicy>,

    /// Test execution strategy (auto, whole, targeted).
    #[arg(long)]
    pub strategy: Option<ExecutionStrategy>,
}

/// Arguments for `swe-grade score`.
#[derive(Parser, Debug)]
pub struct ScoreArgs {
    /// JUnit XML files.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Scoring policy (graduated, binary).
    #[arg(long, default_value = "graduated")]
    pub policy: ScoringPolicy,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `swe-grade batch`.
#[derive(Parser, Debug)]
pub struct BatchArgs {
    /// JSON or YAML file with the tasks.
    #[arg(short, long)]
    pub tasks: PathBuf,

    /// Number of tasks graded concurrently.
    #[arg(short = 'p', long, default_value = "1")]
    pub parallel: usize,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Write Prometheus metrics to this file when done.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Grade(args) => run_grade_command(args).await,
        Commands::Score(args) => run_score_command(args),
        Commands::Batch(args) => run_batch_command(args).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn load_config(args: &PipelineArgs) -> anyhow::Result<GradingConfig> {
    let mut config = GradingConfig::load(args.config.as_deref())?;
    if let Some(policy) = args.policy {
        config.scoring_policy = policy;
    }
    if let Some(strategy) = args.strategy {
        config.execution_strategy = strategy;
    }
    Ok(config)
}

async fn run_grade_command(args: GradeArgs) -> anyhow::Result<()> {
    let config = load_config(&args.pipeline)?;
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let mut request = GradingRequest::new(args.base, args.test)
        .with_target_files(args.target_files)
        .with_only_server(args.only_server)
        .with_golden_check(args.golden_check);
    if let Some(golden) = args.golden {
        request = request.with_golden(golden);
    }
    if let Some(path) = args.test_patch {
        request = request.with_test_patch_path(path);
    }
    if let Some(path) = args.golden_patch {
        request = request.with_golden_patch_path(path);
    }
    if let Some(path) = args.repo_path {
        request = request.with_repo_path(path);
    }

    let runner = GradingRunner::with_tokio_runner(config)?;
    let result = runner.run_grading(&request).await;
    print_result(&result, args.json)
}

fn run_score_command(args: ScoreArgs) -> anyhow::Result<()> {
    let mut inputs = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let xml = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        inputs.push(RawDocument::new(path.display().to_string(), xml));
    }

    let aggregated = ResultAggregator::new().aggregate(&inputs);
    let score = ScoringEngine::new(args.policy).evaluate(&aggregated);
    let counts = aggregated.counts();

    if args.json {
        let output = serde_json::json!({
            "score": score.value,
            "reason": score.reason,
            "policy": args.policy,
            "counts": counts,
            "unparseable": aggregated.unparseable,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Score:    {}", score.value);
        println!("Reason:   {}", score.reason);
        println!(
            "Tests:    {} total, {} passed, {} failures, {} errors, {} skipped",
            counts.total,
            counts.passed(),
            counts.failures,
            counts.errors,
            counts.skipped
        );
        for input in &aggregated.unparseable {
            println!("  unparseable {}: {}", input.source, input.reason);
        }
    }
    Ok(())
}

async fn run_batch_command(args: BatchArgs) -> anyhow::Result<()> {
    let config = load_config(&args.pipeline)?;
    init_metrics()?;

    let tasks = load_tasks(&args.tasks)?;
    info!("Grading {} tasks from {}", tasks.len(), args.tasks.display());

    let runner = Arc::new(GradingRunner::with_tokio_runner(config)?);
    let summary = run_batch(runner, &tasks, args.parallel).await;

    if let Some(path) = &args.metrics_out {
        write_metrics(path)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("\n=== Batch Grading Results ===");
        println!("Total tasks: {}", summary.total);
        println!("Perfect:     {}", summary.perfect);
        println!("Partial:     {}", summary.partial);
        println!("Zero:        {}", summary.zero);
        println!("Mean score:  {:.4}", summary.mean_score);
        println!();
        for entry in &summary.results {
            println!(
                "  {} score={} reason={}",
                entry.task_id,
                entry.score,
                entry.reason.as_deref().unwrap_or("-")
            );
            if let Some(err) = &entry.error {
                println!("    error: {err}");
            }
        }
    }
    Ok(())
}

fn print_result(result: &ScoreResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("Score:  {}", result.score);
    println!("Reason: {}", result.diagnostics.reason().unwrap_or("-"));
    if let Some(counts) = result.diagnostics.get("counts") {
        println!("Counts: {}", counts);
    }
    if let Some(err) = result.diagnostics.error() {
        println!("Error:  {}", err);
        if let Some(details) = result.diagnostics.get("details").and_then(|d| d.as_str()) {
            println!("  {}", details);
        }
    }
    if let Some(ws) = result.diagnostics.get("workspace").and_then(|w| w.as_str()) {
        println!("Workspace kept at {}", ws);
    }
    Ok(())
}

fn write_metrics(path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, export_metrics())
        .map_err(|e| anyhow::anyhow!("Failed to write metrics to {}: {}", path.display(), e))?;
    info!("Metrics written to {}", path.display());
    Ok(())
}
