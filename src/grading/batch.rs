//! Grading many mined tasks with bounded concurrency.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use super::request::GradingRequest;
use super::runner::{GradingRunner, ScoreResult};
use crate::scoring::round4;

/// A mined task as stored in task files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingTask {
    pub task_id: String,
    pub buggy_commit: String,
    pub golden_commit: String,
    /// Defaults to the golden commit.
    #[serde(default)]
    pub test_commit: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
}

impl GradingTask {
    /// The request that grades this task.
    pub fn to_request(&self) -> GradingRequest {
        let test = self
            .test_commit
            .clone()
            .unwrap_or_else(|| self.golden_commit.clone());
        let mut request = GradingRequest::new(self.buggy_commit.as_str(), test)
            .with_golden(self.golden_commit.as_str())
            .with_target_files(self.files.iter().cloned());
        if let Some(repo) = &self.repo_path {
            request = request.with_repo_path(repo);
        }
        request
    }
}

/// Reads tasks from a `.yaml`/`.yml` file or a JSON file.
pub fn load_tasks(path: &Path) -> anyhow::Result<Vec<GradingTask>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read tasks file {}: {}", path.display(), e))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let tasks = if is_yaml {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(tasks)
}

/// Per-task line of a [`BatchSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub task_id: String,
    pub score: f64,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub perfect: usize,
    pub partial: usize,
    pub zero: usize,
    pub mean_score: f64,
    pub results: Vec<BatchEntry>,
}

impl BatchSummary {
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a ScoreResult)>,
    {
        let mut summary = Self::default();
        let mut sum = 0.0;
        for (task_id, result) in results {
            summary.total += 1;
            sum += result.score;
            if result.score >= 1.0 {
                summary.perfect += 1;
            } else if result.score > 0.0 {
                summary.partial += 1;
            } else {
                summary.zero += 1;
            }
            summary.results.push(BatchEntry {
                task_id: task_id.to_string(),
                score: result.score,
                reason: result.diagnostics.reason().map(str::to_string),
                error: result.diagnostics.error().map(str::to_string),
            });
        }
        if summary.total > 0 {
            summary.mean_score = round4(sum / summary.total as f64);
        }
        summary
    }
}

/// Grades `tasks` with at most `parallel` runs in flight.
/// Results keep the input order.
pub async fn run_batch(
    runner: Arc<GradingRunner>,
    tasks: &[GradingTask],
    parallel: usize,
) -> BatchSummary {
    let parallel = parallel.max(1);
    tracing::info!(tasks = tasks.len(), parallel, "Starting batch grading");

    let results: Vec<ScoreResult> = stream::iter(tasks.iter().map(|task| {
        let runner = runner.clone();
        async move {
            let result = runner.run_grading(&task.to_request()).await;
            tracing::info!(task_id = %task.task_id, score = result.score, "Task graded");
            result
        }
    }))
    .buffered(parallel)
    .collect()
    .await;

    BatchSummary::from_results(
        tasks
            .iter()
            .map(|t| t.task_id.as_str())
            .zip(results.iter()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grading::runner::Diagnostics;
    use tempfile::TempDir;

    fn result(score: f64, reason: &str) -> ScoreResult {
        let mut diagnostics = Diagnostics::new();
        diagnostics.insert("reason", reason);
        ScoreResult { score, diagnostics }
    }

    #[test]
    fn test_task_to_request_defaults_test_commit() {
        let task: GradingTask = serde_json::from_str(
            r#"{"task_id":"t1","buggy_commit":"aaa","golden_commit":"bbb","files":["tests/x_test.go","tests/x_test.go"]}"#,
        )
        .unwrap();
        let request = task.to_request();
        assert_eq!(request.base.as_str(), "aaa");
        assert_eq!(request.test.as_str(), "bbb");
        assert_eq!(request.golden.as_ref().unwrap().as_str(), "bbb");
        assert_eq!(request.target_files.len(), 1);
        assert_eq!(request.repo_path, None);
    }

    #[test]
    fn test_load_tasks_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let json = dir.path().join("tasks.json");
        std::fs::write(
            &json,
            r#"[{"task_id":"a","buggy_commit":"1","golden_commit":"2","test_commit":"3","message":"fix"}]"#,
        )
        .unwrap();
        let tasks = load_tasks(&json).unwrap();
        assert_eq!(tasks[0].test_commit.as_deref(), Some("3"));
        assert_eq!(tasks[0].message, "fix");

        let yaml = dir.path().join("tasks.yaml");
        std::fs::write(
            &yaml,
            "- task_id: b\n  buggy_commit: '1'\n  golden_commit: '2'\n  repo_path: /srv/repo\n",
        )
        .unwrap();
        let tasks = load_tasks(&yaml).unwrap();
        assert_eq!(tasks[0].task_id, "b");
        assert_eq!(tasks[0].repo_path, Some(PathBuf::from("/srv/repo")));
    }

    #[test]
    fn test_load_tasks_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(load_tasks(&dir.path().join("none.json")).is_err());
    }

    #[test]
    fn test_summary_buckets() {
        let results = [
            ("a", result(1.0, "scored")),
            ("b", result(0.55, "scored")),
            ("c", result(0.0, "build_failure")),
        ];
        let summary = BatchSummary::from_results(results.iter().map(|(id, r)| (*id, r)));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.perfect, 1);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.zero, 1);
        assert_eq!(summary.mean_score, 0.5167);
        assert_eq!(summary.results[2].reason.as_deref(), Some("build_failure"));
        assert_eq!(summary.results[1].task_id, "b");
    }

    #[test]
    fn test_empty_summary() {
        let summary = BatchSummary::from_results(std::iter::empty());
        assert_eq!(summary.total, 0);
        assert_eq!(summary.mean_score, 0.0);
    }
}
