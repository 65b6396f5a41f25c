//! Run options
//!
//! A single explicit options record passed into `run(...)` and threaded
//! through constructors; there are no process-wide singletons. Options load
//! from a TOML file with defaults for everything, and CLI flags override on
//! top.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Options for one orchestrator run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Maximum retries per phase
    pub max_retries: u32,
    /// Whether the associative memory is active
    pub memory_enabled: bool,
    /// Root directory for snapshots, logs, and workspaces
    pub persist_dir: PathBuf,
    /// Minimum acceptable test coverage ratio (0..=1)
    pub coverage_threshold: f64,
    /// Minimum acceptable quality score (0..=10)
    pub quality_score_threshold: f64,
    /// Extra whitelisted workspace roots beyond the run workspace
    pub workspace_roots: Vec<PathBuf>,
    /// Model id used for roles with no explicit binding
    pub default_model: String,
    /// Extra dangerous-pattern regexes layered over the built-in set
    pub dangerous_patterns: Vec<String>,
    /// Package names rejected by the dependency guardrail
    pub dependency_blocklist: Vec<String>,
    /// Seconds to wait for human feedback before taking the default action;
    /// `None` waits indefinitely
    pub feedback_timeout_secs: Option<u64>,
    /// Maximum accepted project-description length in characters
    pub description_cap: usize,
    /// Concurrent LLM invocations a crew may have in flight
    pub llm_capacity: usize,
    /// Half-life of the memory recency decay, in seconds
    pub memory_half_life_secs: u64,
    /// Role name to model id bindings
    pub role_models: BTreeMap<String, String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            memory_enabled: true,
            persist_dir: PathBuf::from(".cadre"),
            coverage_threshold: 0.8,
            quality_score_threshold: 7.0,
            workspace_roots: Vec::new(),
            default_model: "default".to_string(),
            dangerous_patterns: Vec::new(),
            dependency_blocklist: Vec::new(),
            feedback_timeout_secs: Some(300),
            description_cap: 8000,
            llm_capacity: 4,
            memory_half_life_secs: 3600,
            role_models: BTreeMap::new(),
        }
    }
}

impl RunOptions {
    /// Load options from a TOML file
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let options: RunOptions = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse options file: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Check value ranges; called at startup so bad configuration fails fast
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.coverage_threshold) {
            return Err(Error::Config(format!(
                "coverage_threshold must be within 0..=1, got {}",
                self.coverage_threshold
            )));
        }
        if !(0.0..=10.0).contains(&self.quality_score_threshold) {
            return Err(Error::Config(format!(
                "quality_score_threshold must be within 0..=10, got {}",
                self.quality_score_threshold
            )));
        }
        if self.llm_capacity == 0 {
            return Err(Error::Config("llm_capacity must be positive".to_string()));
        }
        if self.description_cap == 0 {
            return Err(Error::Config("description_cap must be positive".to_string()));
        }
        if self.default_model.trim().is_empty() && self.role_models.is_empty() {
            return Err(Error::Config(
                "no default model and no role model bindings configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the model id for a role: explicit binding, else the default
    pub fn model_for_role(&self, role: &str) -> Result<String> {
        if let Some(model) = self.role_models.get(role) {
            if model.trim().is_empty() {
                return Err(Error::Config(format!("empty model bound to role '{role}'")));
            }
            return Ok(model.clone());
        }
        if self.default_model.trim().is_empty() {
            return Err(Error::Config(format!(
                "no model configured for role '{role}'"
            )));
        }
        Ok(self.default_model.clone())
    }

    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = dir.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_memory_enabled(mut self, enabled: bool) -> Self {
        self.memory_enabled = enabled;
        self
    }

    pub fn with_role_model(mut self, role: impl Into<String>, model: impl Into<String>) -> Self {
        self.role_models.insert(role.into(), model.into());
        self
    }

    pub fn with_feedback_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.feedback_timeout_secs = timeout.map(|d| d.as_secs());
        self
    }

    /// Feedback timeout as a duration, if bounded
    pub fn feedback_timeout(&self) -> Option<Duration> {
        self.feedback_timeout_secs.map(Duration::from_secs)
    }

    /// Memory recency half-life
    pub fn memory_half_life(&self) -> Duration {
        Duration::from_secs(self.memory_half_life_secs.max(1))
    }
}
