//! Reduction of aggregated test results to a bounded reward.
//!
//! Score distribution under the graduated policy:
//! - 0.0: build failure or unusable results (decided before counts are read)
//! - 0.1: build succeeded but every test failed, or no tests ran
//! - 0.1 -> 1.0: linear in the fraction of passing tests

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::junit::{AggregatedResult, ResultCounts};

/// Score for a build that compiled but where nothing passed.
pub const GRADUATED_FLOOR: f64 = 0.1;

/// Score for a build failure under every policy.
pub const BUILD_FAILURE_SCORE: f64 = 0.0;

/// How aggregate counts are turned into a score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// Partial credit proportional to the passing fraction.
    #[default]
    Graduated,
    /// 1.0 only when every test passes.
    Binary,
}

impl std::fmt::Display for ScoringPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graduated => write!(f, "graduated"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for ScoringPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "graduated" => Ok(Self::Graduated),
            "binary" => Ok(Self::Binary),
            other => Err(format!(
                "unknown scoring policy '{}', expected graduated or binary",
                other
            )),
        }
    }
}

/// Why a run ended with the score it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreReason {
    Scored,
    NoTests,
    BuildFailure,
    TestTimeout,
    ResultParseError,
    WorkspaceSetupError,
    AntiCheatResetError,
    PatchApplyError,
    InvalidRequest,
    InternalError,
}

impl ScoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scored => "scored",
            Self::NoTests => "no_tests",
            Self::BuildFailure => "build_failure",
            Self::TestTimeout => "test_timeout",
            Self::ResultParseError => "result_parse_error",
            Self::WorkspaceSetupError => "workspace_setup_error",
            Self::AntiCheatResetError => "anti_cheat_reset_error",
            Self::PatchApplyError => "patch_apply_error",
            Self::InvalidRequest => "invalid_request",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ScoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A score together with the reason it was assigned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub reason: ScoreReason,
}

/// Applies a [`ScoringPolicy`] to aggregated results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringEngine {
    policy: ScoringPolicy,
}

impl ScoringEngine {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ScoringPolicy {
        self.policy
    }

    /// Scores raw counts `(N, F, E, S)`.
    pub fn score_counts(&self, counts: &ResultCounts) -> f64 {
        match self.policy {
            ScoringPolicy::Graduated => {
                if counts.total == 0 {
                    return GRADUATED_FLOOR;
                }
                let ratio = counts.passed() as f64 / counts.total as f64;
                round4(GRADUATED_FLOOR + (1.0 - GRADUATED_FLOOR) * ratio)
            }
            ScoringPolicy::Binary => {
                if counts.total > 0 && counts.failures == 0 && counts.errors == 0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Scores an aggregated result. Any unparseable input, or totals that
    /// overflow, void the score.
    pub fn evaluate(&self, result: &AggregatedResult) -> Score {
        let counts = match result.checked_counts() {
            Some(counts) if result.is_clean() => counts,
            _ => {
                return Score {
                    value: 0.0,
                    reason: ScoreReason::ResultParseError,
                }
            }
        };
        let reason = if counts.total == 0 {
            ScoreReason::NoTests
        } else {
            ScoreReason::Scored
        };
        Score {
            value: self.score_counts(&counts),
            reason,
        }
    }

    /// Score assigned when the build failed.
    pub fn build_failure(&self) -> Score {
        Score {
            value: BUILD_FAILURE_SCORE,
            reason: ScoreReason::BuildFailure,
        }
    }
}

/// Round to four decimal places.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::junit::{RawDocument, ResultAggregator};

    fn counts(total: u64, failures: u64, errors: u64) -> ResultCounts {
        ResultCounts {
            total,
            failures,
            errors,
            skipped: 0,
        }
    }

    #[test]
    fn test_graduated_formula() {
        let engine = ScoringEngine::new(ScoringPolicy::Graduated);
        assert_eq!(engine.score_counts(&counts(10, 0, 0)), 1.0);
        assert_eq!(engine.score_counts(&counts(10, 3, 0)), 0.73);
        assert_eq!(engine.score_counts(&counts(10, 5, 0)), 0.55);
        assert_eq!(engine.score_counts(&counts(10, 10, 0)), 0.1);
        assert_eq!(engine.score_counts(&counts(3, 1, 0)), 0.7);
        assert_eq!(engine.score_counts(&counts(7, 2, 1)), round4(0.1 + 0.9 * 4.0 / 7.0));
        assert_eq!(engine.score_counts(&counts(0, 0, 0)), 0.1);
    }

    #[test]
    fn test_binary_formula() {
        let engine = ScoringEngine::new(ScoringPolicy::Binary);
        assert_eq!(engine.score_counts(&counts(10, 0, 0)), 1.0);
        assert_eq!(engine.score_counts(&counts(10, 3, 0)), 0.0);
        assert_eq!(engine.score_counts(&counts(10, 0, 1)), 0.0);
        assert_eq!(engine.score_counts(&counts(0, 0, 0)), 0.0);
    }

    #[test]
    fn test_skipped_tests_count_as_passed() {
        let engine = ScoringEngine::default();
        let c = ResultCounts {
            total: 4,
            failures: 0,
            errors: 0,
            skipped: 2,
        };
        assert_eq!(engine.score_counts(&c), 1.0);
    }

    #[test]
    fn test_evaluate_reasons() {
        let aggregator = ResultAggregator::new();
        let engine = ScoringEngine::default();

        let empty = aggregator.aggregate(&[RawDocument::new("r", "<testsuites/>")]);
        assert_eq!(
            engine.evaluate(&empty),
            Score { value: 0.1, reason: ScoreReason::NoTests }
        );

        let broken = aggregator.aggregate(&[
            RawDocument::new("ok", r#"<testsuite name="a" tests="2" failures="0"/>"#),
            RawDocument::new("bad", "not xml at all <"),
        ]);
        assert_eq!(
            engine.evaluate(&broken),
            Score { value: 0.0, reason: ScoreReason::ResultParseError }
        );

        let fine = aggregator.aggregate(&[RawDocument::new(
            "ok",
            r#"<testsuite name="a" tests="2" failures="1"/>"#,
        )]);
        assert_eq!(engine.evaluate(&fine).reason, ScoreReason::Scored);
        assert_eq!(engine.evaluate(&fine).value, 0.55);
    }

    #[test]
    fn test_overflowing_aggregate_is_not_scored() {
        let aggregated = ResultAggregator::new().aggregate(&[
            RawDocument::new(
                "huge",
                r#"<testsuite name="a" tests="18446744073709551615" failures="18446744073709551615"/>"#,
            ),
            RawDocument::new("small", r#"<testsuite name="b" tests="11" failures="1"/>"#),
        ]);
        assert!(aggregated.is_clean());
        assert_eq!(aggregated.checked_counts(), None);

        for policy in [ScoringPolicy::Graduated, ScoringPolicy::Binary] {
            assert_eq!(
                ScoringEngine::new(policy).evaluate(&aggregated),
                Score { value: 0.0, reason: ScoreReason::ResultParseError }
            );
        }
    }

    #[test]
    fn test_build_failure_is_zero_under_every_policy() {
        for policy in [ScoringPolicy::Graduated, ScoringPolicy::Binary] {
            let score = ScoringEngine::new(policy).build_failure();
            assert_eq!(score.value, 0.0);
            assert_eq!(score.reason, ScoreReason::BuildFailure);
        }
    }

    #[test]
    fn test_policy_parse_and_display() {
        assert_eq!("binary".parse::<ScoringPolicy>().unwrap(), ScoringPolicy::Binary);
        assert_eq!(" Graduated ".parse::<ScoringPolicy>().unwrap(), ScoringPolicy::Graduated);
        assert!("dense".parse::<ScoringPolicy>().is_err());
        assert_eq!(ScoringPolicy::Binary.to_string(), "binary");
        assert_eq!(ScoreReason::ResultParseError.to_string(), "result_parse_error");
    }
}
