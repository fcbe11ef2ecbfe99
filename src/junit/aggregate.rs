//! Merging of many result documents into one.

use serde::{Deserialize, Serialize};

use super::{ResultCounts, TestResultDocument};

/// An unparsed report together with a label naming where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub source: String,
    pub xml: String,
}

impl RawDocument {
    pub fn new(source: impl Into<String>, xml: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            xml: xml.into(),
        }
    }
}

/// An input that was excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnparseableInput {
    pub source: String,
    pub reason: String,
}

/// Concatenation of every parsed input's suites, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub document: TestResultDocument,
    /// Labels of the inputs that contributed suites.
    pub sources: Vec<String>,
    /// Inputs that failed to parse.
    pub unparseable: Vec<UnparseableInput>,
}

impl AggregatedResult {
    /// Totals, saturating at `u64::MAX`.
    pub fn counts(&self) -> ResultCounts {
        self.document.counts()
    }

    /// Totals, `None` if they overflow.
    pub fn checked_counts(&self) -> Option<ResultCounts> {
        self.document.checked_counts()
    }

    /// Whether every input parsed.
    pub fn is_clean(&self) -> bool {
        self.unparseable.is_empty()
    }
}

/// Stateless aggregator over result documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Parses each raw input and concatenates the suites of those that parse.
    pub fn aggregate(&self, inputs: &[RawDocument]) -> AggregatedResult {
        let mut result = AggregatedResult::default();
        for input in inputs {
            match TestResultDocument::parse(&input.xml) {
                Ok(document) => {
                    result.document.suites.extend(document.suites);
                    result.sources.push(input.source.clone());
                }
                Err(e) => {
                    tracing::warn!(source = %input.source, error = %e, "Excluding unparseable result document");
                    result.unparseable.push(UnparseableInput {
                        source: input.source.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        result
    }

    /// Concatenates already-normalized documents.
    pub fn from_documents<I, S>(&self, documents: I) -> AggregatedResult
    where
        I: IntoIterator<Item = (S, TestResultDocument)>,
        S: Into<String>,
    {
        let mut result = AggregatedResult::default();
        for (source, document) in documents {
            result.document.suites.extend(document.suites);
            result.sources.push(source.into());
        }
        result
    }

    /// Merges aggregated results, keeping input order.
    pub fn merge<I>(&self, parts: I) -> AggregatedResult
    where
        I: IntoIterator<Item = AggregatedResult>,
    {
        parts
            .into_iter()
            .fold(AggregatedResult::default(), |mut acc, part| {
                acc.document.suites.extend(part.document.suites);
                acc.sources.extend(part.sources);
                acc.unparseable.extend(part.unparseable);
                acc
            })
    }
}
