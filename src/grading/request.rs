//! Inputs of a single grading run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::GradingError;
use crate::process::{validate_git_ref, validate_relative_path};

/// Default location of the supplementary test patch.
pub const DEFAULT_TEST_PATCH_PATH: &str = "/home/ubuntu/test.patch";
/// Default location of the golden patch.
pub const DEFAULT_GOLDEN_PATCH_PATH: &str = "/home/ubuntu/golden.patch";

/// Opaque commit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitReference(String);

impl CommitReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_git_ref(&self.0)
    }
}

impl std::fmt::Display for CommitReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitReference {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CommitReference {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Ordered, de-duplicated repository-relative paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TargetFileSet(Vec<String>);

impl TargetFileSet {
    /// Keeps the first occurrence of each path.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for path in paths {
            set.insert(path);
        }
        set
    }

    pub fn insert(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.0.contains(&path) {
            self.0.push(path);
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for TargetFileSet {
    fn from(paths: Vec<String>) -> Self {
        Self::new(paths)
    }
}

impl From<TargetFileSet> for Vec<String> {
    fn from(set: TargetFileSet) -> Self {
        set.0
    }
}

/// One grading request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingRequest {
    /// Pre-fix state.
    pub base: CommitReference,
    /// State used to validate.
    pub test: CommitReference,
    /// Trusted reference fix; anti-cheat restoration reads from it.
    pub golden: Option<CommitReference>,
    pub target_files: TargetFileSet,
    pub test_patch_path: PathBuf,
    pub golden_patch_path: PathBuf,
    pub only_server: bool,
    /// Apply the golden patch before the test patch to validate a task.
    pub golden_check: bool,
    /// Overrides the configured reference repository.
    pub repo_path: Option<PathBuf>,
}

impl GradingRequest {
    pub fn new(base: impl Into<CommitReference>, test: impl Into<CommitReference>) -> Self {
        Self {
            base: base.into(),
            test: test.into(),
            golden: None,
            target_files: TargetFileSet::default(),
            test_patch_path: PathBuf::from(DEFAULT_TEST_PATCH_PATH),
            golden_patch_path: PathBuf::from(DEFAULT_GOLDEN_PATCH_PATH),
            only_server: false,
            golden_check: false,
            repo_path: None,
        }
    }

    pub fn with_golden(mut self, golden: impl Into<CommitReference>) -> Self {
        self.golden = Some(golden.into());
        self
    }

    pub fn with_target_files<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_files = TargetFileSet::new(paths);
        self
    }

    pub fn with_test_patch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.test_patch_path = path.into();
        self
    }

    pub fn with_golden_patch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.golden_patch_path = path.into();
        self
    }

    pub fn with_only_server(mut self, only_server: bool) -> Self {
        self.only_server = only_server;
        self
    }

    pub fn with_golden_check(mut self, golden_check: bool) -> Self {
        self.golden_check = golden_check;
        self
    }

    pub fn with_repo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.repo_path = Some(path.into());
        self
    }

    /// Checks commit references and target paths before anything touches disk.
    pub fn validate(&self) -> Result<(), GradingError> {
        let refs = [
            ("base", Some(&self.base)),
            ("test", Some(&self.test)),
            ("golden", self.golden.as_ref()),
        ];
        for (role, reference) in refs {
            if let Some(reference) = reference {
                reference.validate().map_err(|e| {
                    GradingError::InvalidRequest(format!("{} reference: {}", role, e))
                })?;
            }
        }
        for path in self.target_files.iter() {
            validate_relative_path(path)
                .map_err(|e| GradingError::InvalidRequest(format!("target file: {}", e)))?;
        }
        Ok(())
    }
}
