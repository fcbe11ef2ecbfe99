//! Canonical JUnit result documents.
//!
//! Every test report the pipeline touches, real or synthetic, is normalized
//! into [`TestResultDocument`] at the boundary by [`TestResultDocument::parse`].
//! Everything downstream (aggregation, scoring, diagnostics) works on this
//! type only.

use std::fmt::Write as _;
use std::iter::Sum;
use std::ops::Add;

use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};

use crate::error::ResultParseError;

pub mod aggregate;
mod parser;

pub use aggregate::{AggregatedResult, RawDocument, ResultAggregator, UnparseableInput};

/// Failure type written into synthetic documents.
pub const SYNTHETIC_FAILURE_TYPE: &str = "TestFailure";

// ============================================================================
// Types
// ============================================================================

/// An ordered sequence of test suites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResultDocument {
    pub suites: Vec<TestSuite>,
}

/// One `<testsuite>` with its normalized counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    pub tests: u64,
    pub failures: u64,
    pub errors: u64,
    pub skipped: u64,
    pub testcases: Vec<TestCase>,
}

/// One `<testcase>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub classname: Option<String>,
    pub time: Option<f64>,
    pub outcome: CaseOutcome,
    pub system_out: Option<String>,
    pub system_err: Option<String>,
}

/// Result of a single test case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CaseOutcome {
    #[default]
    Passed,
    Skipped { message: Option<String> },
    Failure(FailurePayload),
    Error(FailurePayload),
}

/// Content of a `<failure>` or `<error>` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailurePayload {
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: String,
}

/// Test counts `(N, F, E, S)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    pub total: u64,
    pub failures: u64,
    pub errors: u64,
    pub skipped: u64,
}

impl ResultCounts {
    /// Tests that neither failed nor errored. Skipped tests count as passed.
    pub fn passed(&self) -> u64 {
        self.total
            .saturating_sub(self.failures.saturating_add(self.errors))
    }

    /// `total >= failures + errors + skipped`, with the sum computed without
    /// wrapping.
    pub fn is_consistent(&self) -> bool {
        self.failures
            .checked_add(self.errors)
            .and_then(|sum| sum.checked_add(self.skipped))
            .is_some_and(|sum| sum <= self.total)
    }

    /// Field-wise sum, `None` if any field overflows.
    pub fn checked_add(self, rhs: ResultCounts) -> Option<ResultCounts> {
        Some(ResultCounts {
            total: self.total.checked_add(rhs.total)?,
            failures: self.failures.checked_add(rhs.failures)?,
            errors: self.errors.checked_add(rhs.errors)?,
            skipped: self.skipped.checked_add(rhs.skipped)?,
        })
    }

    /// Sum of `counts`, `None` on overflow.
    pub fn checked_sum<I>(counts: I) -> Option<ResultCounts>
    where
        I: IntoIterator<Item = ResultCounts>,
    {
        counts
            .into_iter()
            .try_fold(ResultCounts::default(), ResultCounts::checked_add)
    }
}

/// Saturating; use [`ResultCounts::checked_add`] where overflow must be seen.
impl Add for ResultCounts {
    type Output = ResultCounts;

    fn add(self, rhs: ResultCounts) -> ResultCounts {
        ResultCounts {
            total: self.total.saturating_add(rhs.total),
            failures: self.failures.saturating_add(rhs.failures),
            errors: self.errors.saturating_add(rhs.errors),
            skipped: self.skipped.saturating_add(rhs.skipped),
        }
    }
}

impl Sum for ResultCounts {
    fn sum<I: Iterator<Item = ResultCounts>>(iter: I) -> ResultCounts {
        iter.fold(ResultCounts::default(), Add::add)
    }
}

impl TestSuite {
    pub fn counts(&self) -> ResultCounts {
        ResultCounts {
            total: self.tests,
            failures: self.failures,
            errors: self.errors,
            skipped: self.skipped,
        }
    }
}

impl TestCase {
    /// A passing test case with no captured output.
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classname: None,
            time: None,
            outcome: CaseOutcome::Passed,
            system_out: None,
            system_err: None,
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

impl TestResultDocument {
    /// Parses and normalizes a JUnit XML document.
    ///
    /// Accepts a `<testsuites>` root or a bare `<testsuite>` root. When a suite
    /// carries a `tests` attribute its counts come from attributes, otherwise
    /// they are derived from its test cases.
    pub fn parse(xml: &str) -> Result<Self, ResultParseError> {
        parser::parse_document(xml)
    }

    /// Single-suite, single-failing-case document used for build failures,
    /// crashes and timeouts.
    pub fn synthetic(name: &str, message: &str, stdout: &str, stderr: &str) -> Self {
        let case = TestCase {
            name: format!("test{}", name),
            classname: Some(name.to_string()),
            time: Some(0.0),
            outcome: CaseOutcome::Failure(FailurePayload {
                message: Some(message.to_string()),
                kind: Some(SYNTHETIC_FAILURE_TYPE.to_string()),
                text: message.to_string(),
            }),
            system_out: Some(stdout.to_string()),
            system_err: Some(stderr.to_string()),
        };
        Self {
            suites: vec![TestSuite {
                name: name.to_string(),
                tests: 1,
                failures: 1,
                errors: 0,
                skipped: 0,
                testcases: vec![case],
            }],
        }
    }

    /// Sum of all suite counts, saturating at `u64::MAX`.
    pub fn counts(&self) -> ResultCounts {
        self.suites.iter().map(TestSuite::counts).sum()
    }

    /// Sum of all suite counts, `None` if it does not fit in `u64`.
    pub fn checked_counts(&self) -> Option<ResultCounts> {
        ResultCounts::checked_sum(self.suites.iter().map(TestSuite::counts))
    }

    /// Canonical XML rendering. `parse(to_xml(d)) == d` for every document.
    pub fn to_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuites>\n");
        for suite in &self.suites {
            write_suite(&mut out, suite);
        }
        out.push_str("</testsuites>\n");
        out
    }
}

fn write_suite(out: &mut String, suite: &TestSuite) {
    let _ = write!(
        out,
        "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\"",
        escape(suite.name.as_str()),
        suite.tests,
        suite.failures,
        suite.errors,
        suite.skipped
    );
    if suite.testcases.is_empty() {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");
    for case in &suite.testcases {
        write_case(out, case);
    }
    out.push_str("  </testsuite>\n");
}

fn write_case(out: &mut String, case: &TestCase) {
    let _ = write!(out, "    <testcase name=\"{}\"", escape(case.name.as_str()));
    if let Some(classname) = &case.classname {
        let _ = write!(out, " classname=\"{}\"", escape(classname.as_str()));
    }
    if let Some(time) = case.time {
        let _ = write!(out, " time=\"{}\"", time);
    }

    let has_children = !matches!(case.outcome, CaseOutcome::Passed)
        || case.system_out.is_some()
        || case.system_err.is_some();
    if !has_children {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");

    match &case.outcome {
        CaseOutcome::Passed => {}
        CaseOutcome::Skipped { message } => {
            out.push_str("      <skipped");
            if let Some(message) = message {
                let _ = write!(out, " message=\"{}\"", escape(message.as_str()));
            }
            out.push_str("/>\n");
        }
        CaseOutcome::Failure(payload) => write_payload(out, "failure", payload),
        CaseOutcome::Error(payload) => write_payload(out, "error", payload),
    }
    if let Some(text) = &case.system_out {
        let _ = writeln!(out, "      <system-out>{}</system-out>", escape(text.as_str()));
    }
    if let Some(text) = &case.system_err {
        let _ = writeln!(out, "      <system-err>{}</system-err>", escape(text.as_str()));
    }
    out.push_str("    </testcase>\n");
}

fn write_payload(out: &mut String, tag: &str, payload: &FailurePayload) {
    let _ = write!(out, "      <{}", tag);
    if let Some(message) = &payload.message {
        let _ = write!(out, " message=\"{}\"", escape(message.as_str()));
    }
    if let Some(kind) = &payload.kind {
        let _ = write!(out, " type=\"{}\"", escape(kind.as_str()));
    }
    let _ = writeln!(out, ">{}</{}>", escape(payload.text.as_str()), tag);
}
