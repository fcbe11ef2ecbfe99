//! Normalizing JUnit XML parser.
//!
//! The reader builds a small element tree first, then the tree is
//! interpreted as suites and cases. Whitespace between elements is kept in
//! the tree but only leaf text (`failure`, `error`, `system-out`,
//! `system-err`) is ever read back.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{CaseOutcome, FailurePayload, TestCase, TestResultDocument, TestSuite};
use crate::error::ResultParseError;

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

#[derive(Debug)]
enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            Node::Text(_) => None,
        })
    }

    fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }
}

pub(super) fn parse_document(xml: &str) -> Result<TestResultDocument, ResultParseError> {
    let root = read_tree(xml)?;
    match root.name.as_str() {
        "testsuites" => {
            let suites = root
                .elements()
                .filter(|el| el.name == "testsuite")
                .map(interpret_suite)
                .collect::<Result<Vec<_>, _>>()?;
            let document = TestResultDocument { suites };
            if document.checked_counts().is_none() {
                return Err(ResultParseError::CountOverflow);
            }
            Ok(document)
        }
        "testsuite" => Ok(TestResultDocument {
            suites: vec![interpret_suite(&root)?],
        }),
        other => Err(ResultParseError::UnexpectedRoot(other.to_string())),
    }
}

// ============================================================================
// Tree reader
// ============================================================================

fn read_tree(xml: &str) -> Result<Element, ResultParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| ResultParseError::Xml {
            position: reader.error_position() as u64,
            message: e.to_string(),
        })?;
        let position = reader.buffer_position() as u64;

        match event {
            Event::Start(start) => {
                if root.is_some() {
                    break;
                }
                stack.push(open_element(&start, position)?);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    break;
                }
                let element = open_element(&start, position)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => root = Some(element),
                }
            }
            Event::End(end) => {
                let found = String::from_utf8_lossy(end.name().as_ref()).to_string();
                let element = match stack.pop() {
                    Some(el) => el,
                    None => {
                        return Err(ResultParseError::MismatchedTag {
                            expected: String::new(),
                            found,
                        })
                    }
                };
                if element.name != found {
                    return Err(ResultParseError::MismatchedTag {
                        expected: element.name,
                        found,
                    });
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    let value = text.unescape().map_err(|e| ResultParseError::Xml {
                        position,
                        message: e.to_string(),
                    })?;
                    parent.children.push(Node::Text(value.into_owned()));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::Text(String::from_utf8_lossy(&data).into_owned()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(ResultParseError::Unclosed(open.name));
    }
    root.ok_or(ResultParseError::MissingRoot)
}

fn open_element(start: &BytesStart<'_>, position: u64) -> Result<Element, ResultParseError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ResultParseError::Xml {
            position,
            message: e.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| ResultParseError::Xml {
                position,
                message: e.to_string(),
            })?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

// ============================================================================
// Interpretation
// ============================================================================

fn interpret_suite(element: &Element) -> Result<TestSuite, ResultParseError> {
    let name = element.attr("name").unwrap_or_default().to_string();

    let mut testcases = Vec::new();
    collect_cases(element, &mut testcases);

    let derived_failures = count(&testcases, |o| matches!(o, CaseOutcome::Failure(_)));
    let derived_errors = count(&testcases, |o| matches!(o, CaseOutcome::Error(_)));
    let derived_skipped = count(&testcases, |o| matches!(o, CaseOutcome::Skipped { .. }));

    let (tests, failures, errors, skipped) = match element.attr("tests") {
        Some(raw) => (
            parse_count(&name, "tests", raw)?,
            optional_count(element, &name, "failures")?.unwrap_or(0),
            optional_count(element, &name, "errors")?.unwrap_or(0),
            optional_count(element, &name, "skipped")?.unwrap_or(derived_skipped),
        ),
        None => (
            testcases.len() as u64,
            derived_failures,
            derived_errors,
            derived_skipped,
        ),
    };

    let suite = TestSuite {
        name,
        tests,
        failures,
        errors,
        skipped,
        testcases,
    };
    if !suite.counts().is_consistent() {
        return Err(ResultParseError::CountInvariant {
            suite: suite.name,
            total: tests,
            failures,
            errors,
            skipped,
        });
    }
    Ok(suite)
}

/// Nested suites are transparent: their cases belong to the enclosing suite.
fn collect_cases(element: &Element, out: &mut Vec<TestCase>) {
    for child in element.elements() {
        match child.name.as_str() {
            "testcase" => out.push(interpret_case(child)),
            "testsuite" => collect_cases(child, out),
            _ => {}
        }
    }
}

fn interpret_case(element: &Element) -> TestCase {
    let mut outcome = CaseOutcome::Passed;
    let mut system_out = None;
    let mut system_err = None;

    for child in element.elements() {
        match child.name.as_str() {
            "failure" if matches!(outcome, CaseOutcome::Passed) => {
                outcome = CaseOutcome::Failure(payload(child));
            }
            "error" if matches!(outcome, CaseOutcome::Passed) => {
                outcome = CaseOutcome::Error(payload(child));
            }
            "skipped" if matches!(outcome, CaseOutcome::Passed) => {
                outcome = CaseOutcome::Skipped {
                    message: child.attr("message").map(str::to_string),
                };
            }
            "system-out" => system_out = Some(child.text()),
            "system-err" => system_err = Some(child.text()),
            _ => {}
        }
    }

    TestCase {
        name: element.attr("name").unwrap_or_default().to_string(),
        classname: element.attr("classname").map(str::to_string),
        time: element.attr("time").and_then(|t| t.trim().parse::<f64>().ok()),
        outcome,
        system_out,
        system_err,
    }
}

fn payload(element: &Element) -> FailurePayload {
    FailurePayload {
        message: element.attr("message").map(str::to_string),
        kind: element.attr("type").map(str::to_string),
        text: element.text(),
    }
}

fn count(cases: &[TestCase], pred: impl Fn(&CaseOutcome) -> bool) -> u64 {
    cases.iter().filter(|c| pred(&c.outcome)).count() as u64
}

fn optional_count(
    element: &Element,
    suite: &str,
    attribute: &str,
) -> Result<Option<u64>, ResultParseError> {
    element
        .attr(attribute)
        .map(|raw| parse_count(suite, attribute, raw))
        .transpose()
}

fn parse_count(suite: &str, attribute: &str, raw: &str) -> Result<u64, ResultParseError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| ResultParseError::InvalidCount {
            suite: suite.to_string(),
            attribute: attribute.to_string(),
            value: raw.to_string(),
        })
}
