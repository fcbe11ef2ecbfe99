//! Grading configuration.
//!
//! Every knob of a grading run lives in [`GradingConfig`]. Values come from
//! defaults, then an optional YAML file, then environment overrides, and are
//! validated once before a runner is built.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::build::CommandSpec;
use crate::executor::{ExecutionStrategy, TestSettings};
use crate::guard::{AntiCheatMode, AntiCheatPolicy};
use crate::patch::PatchMode;
use crate::scoring::ScoringPolicy;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// A regular expression in the configuration does not compile.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Which target paths count as tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCheatSettings {
    pub test_dir_prefixes: Vec<String>,
    /// Matched against the lowercase path.
    pub test_name_pattern: String,
}

impl Default for AntiCheatSettings {
    fn default() -> Self {
        Self {
            test_dir_prefixes: vec!["tests/".to_string()],
            test_name_pattern: "(?i)test".to_string(),
        }
    }
}

/// Configuration for grading runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    // Locations
    /// Reference repository copied into every workspace.
    pub repo_path: PathBuf,
    /// Read-only git object store holding the golden reference.
    pub reference_store: Option<PathBuf>,
    /// Parent directory of the per-run workspaces.
    pub scratch_root: PathBuf,
    /// Leave the workspace on disk after the run.
    pub keep_workspace: bool,

    // Policies
    pub anti_cheat_mode: AntiCheatMode,
    pub patch_mode: PatchMode,
    pub execution_strategy: ExecutionStrategy,
    pub scoring_policy: ScoringPolicy,

    // Stages
    pub anti_cheat: AntiCheatSettings,
    pub build: CommandSpec,
    pub tests: TestSettings,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("/home/ubuntu/repo"),
            reference_store: None,
            scratch_root: std::env::temp_dir(),
            keep_workspace: false,

            anti_cheat_mode: AntiCheatMode::default(),
            patch_mode: PatchMode::default(),
            execution_strategy: ExecutionStrategy::default(),
            scoring_policy: ScoringPolicy::default(),

            anti_cheat: AntiCheatSettings::default(),
            build: CommandSpec::default(),
            tests: TestSettings::default(),
        }
    }
}

impl GradingConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a YAML configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses a YAML configuration document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Loads the optional file, applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `REPO_PATH`: Reference repository (default: /home/ubuntu/repo)
    /// - `GRADING_REFERENCE_STORE`: Golden reference object store
    /// - `GRADING_SCRATCH_ROOT`: Workspace parent directory (default: system temp)
    /// - `GRADING_KEEP_WORKSPACE`: Keep workspaces after grading (default: false)
    /// - `GRADING_ANTI_CHEAT_MODE`: strict | tolerant (default: tolerant)
    /// - `GRADING_PATCH_MODE`: strict | tolerant (default: tolerant)
    /// - `GRADING_EXECUTION_STRATEGY`: auto | whole | targeted (default: whole)
    /// - `GRADING_SCORING_POLICY`: graduated | binary (default: graduated)
    /// - `GRADING_SCOPE_TIMEOUT_SECS`: Per-scope timeout (default: 600)
    /// - `GRADING_SCOPE_PARALLELISM`: Concurrent scopes (default: 1)
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("REPO_PATH") {
            self.repo_path = PathBuf::from(val);
        }

        if let Some(val) = lookup("GRADING_REFERENCE_STORE") {
            self.reference_store = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("GRADING_SCRATCH_ROOT") {
            self.scratch_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("GRADING_KEEP_WORKSPACE") {
            self.keep_workspace = parse_env_bool(&val, "GRADING_KEEP_WORKSPACE")?;
        }

        // Policies
        if let Some(val) = lookup("GRADING_ANTI_CHEAT_MODE") {
            self.anti_cheat_mode = parse_env_enum(&val, "GRADING_ANTI_CHEAT_MODE")?;
        }

        if let Some(val) = lookup("GRADING_PATCH_MODE") {
            self.patch_mode = parse_env_enum(&val, "GRADING_PATCH_MODE")?;
        }

        if let Some(val) = lookup("GRADING_EXECUTION_STRATEGY") {
            self.execution_strategy = parse_env_enum(&val, "GRADING_EXECUTION_STRATEGY")?;
        }

        if let Some(val) = lookup("GRADING_SCORING_POLICY") {
            self.scoring_policy = parse_env_enum(&val, "GRADING_SCORING_POLICY")?;
        }

        // Test execution
        if let Some(val) = lookup("GRADING_SCOPE_TIMEOUT_SECS") {
            self.tests.scope_timeout_secs = parse_env_value(&val, "GRADING_SCOPE_TIMEOUT_SECS")?;
        }

        if let Some(val) = lookup("GRADING_SCOPE_PARALLELISM") {
            self.tests.scope_parallelism = parse_env_value(&val, "GRADING_SCOPE_PARALLELISM")?;
        }

        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` for empty commands and zero
    /// limits, and `ConfigError::InvalidPattern` for a bad test-name pattern.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build.program.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "build.program cannot be empty".to_string(),
            ));
        }

        if self.tests.whole_suite.program.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "tests.whole_suite.program cannot be empty".to_string(),
            ));
        }

        if self.tests.targeted.program.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "tests.targeted.program cannot be empty".to_string(),
            ));
        }

        if self.tests.report_path.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "tests.report_path cannot be empty".to_string(),
            ));
        }

        if self.tests.scope_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "tests.scope_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.tests.whole_suite_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "tests.whole_suite_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.tests.scope_parallelism == 0 {
            return Err(ConfigError::ValidationFailed(
                "tests.scope_parallelism must be greater than 0".to_string(),
            ));
        }

        self.anti_cheat_policy()?;
        Ok(())
    }

    /// Compiled anti-cheat policy.
    pub fn anti_cheat_policy(&self) -> Result<AntiCheatPolicy, ConfigError> {
        AntiCheatPolicy::new(
            self.anti_cheat.test_dir_prefixes.clone(),
            &self.anti_cheat.test_name_pattern,
        )
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: self.anti_cheat.test_name_pattern.clone(),
            message: e.to_string(),
        })
    }

    /// Builder method to set the reference repository.
    pub fn with_repo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.repo_path = path.into();
        self
    }

    /// Builder method to set the golden reference store.
    pub fn with_reference_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_store = Some(path.into());
        self
    }

    /// Builder method to set the scratch root.
    pub fn with_scratch_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.scratch_root = path.into();
        self
    }

    /// Builder method to keep workspaces after grading.
    pub fn with_keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }

    /// Builder method to set the anti-cheat mode.
    pub fn with_anti_cheat_mode(mut self, mode: AntiCheatMode) -> Self {
        self.anti_cheat_mode = mode;
        self
    }

    /// Builder method to set the patch mode.
    pub fn with_patch_mode(mut self, mode: PatchMode) -> Self {
        self.patch_mode = mode;
        self
    }

    /// Builder method to set the execution strategy.
    pub fn with_execution_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.execution_strategy = strategy;
        self
    }

    /// Builder method to set the scoring policy.
    pub fn with_scoring_policy(mut self, policy: ScoringPolicy) -> Self {
        self.scoring_policy = policy;
        self
    }

    /// Builder method to set the build command.
    pub fn with_build(mut self, command: CommandSpec) -> Self {
        self.build = command;
        self
    }

    /// Builder method to set the test settings.
    pub fn with_tests(mut self, tests: TestSettings) -> Self {
        self.tests = tests;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable into one of the policy enums.
fn parse_env_enum<T>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(|message| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
