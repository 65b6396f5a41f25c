//! Capability-scoped tool interfaces
//!
//! Workers reach the outside world only through these traits. Concrete
//! implementations are external collaborators, except the bundled
//! [`WorkspaceFileStore`] which materializes generated files under the run
//! workspace. Every invocation is audit-logged with redacted arguments.

pub mod fs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::guardrail::security::redact_for_log;
use crate::model::TestRun;

pub use fs::WorkspaceFileStore;

/// Tool invocation error
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("denied: {0}")]
    Denied(String),

    #[error("too large: {path} is {size} bytes (limit {limit})")]
    TooLarge {
        path: String,
        size: u64,
        limit: u64,
    },

    /// Transient unavailability; the caller may retry with backoff
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("cancelled")]
    Cancelled,
}

/// Audit-log one tool invocation. Argument values are redacted before they
/// reach the log.
pub fn audit(tool: &str, operation: &str, args: &[(&str, &str)], outcome: Result<(), &ToolError>) {
    let redacted: Vec<(String, String)> = args
        .iter()
        .map(|(key, value)| ((*key).to_string(), redact_for_log(value)))
        .collect();
    match outcome {
        Ok(()) => {
            tracing::info!(tool, operation, args = ?redacted, "tool invocation ok");
        }
        Err(error) => {
            tracing::warn!(tool, operation, args = ?redacted, %error, "tool invocation failed");
        }
    }
}

/// Filesystem capability, validated against whitelisted workspace roots
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>, ToolError>;
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), ToolError>;
    async fn list(&self, dir: &str) -> Result<Vec<PathBuf>, ToolError>;
}

/// Output of a sandboxed execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Isolated code execution: no network, resource-capped
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn execute(
        &self,
        language: &str,
        source: &str,
        timeout: Duration,
        import_allowlist: &[String],
    ) -> Result<ExecOutcome, ToolError>;
}

/// Deterministic test execution and result parsing
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, tests_path: &str, source_path: &str) -> Result<TestRun, ToolError>;
}

/// Branch names that must never receive direct commits
pub const PROTECTED_BRANCHES: &[&str] = &["main", "master", "release", "production"];

/// Reject operations that target a protected branch
pub fn ensure_unprotected(branch: &str) -> Result<(), ToolError> {
    let normalized = branch.trim().to_lowercase();
    if PROTECTED_BRANCHES.contains(&normalized.as_str()) {
        return Err(ToolError::Denied(format!(
            "refusing to commit to protected branch '{branch}'"
        )));
    }
    Ok(())
}

/// Version-control capability
#[async_trait]
pub trait Vcs: Send + Sync {
    async fn init(&self) -> Result<(), ToolError>;
    async fn add(&self, paths: &[String]) -> Result<(), ToolError>;
    /// Commit staged changes; implementations must refuse protected branches
    async fn commit(&self, message: &str) -> Result<String, ToolError>;
    async fn branch(&self, name: &str) -> Result<(), ToolError>;
    async fn status(&self) -> Result<String, ToolError>;
    async fn diff(&self) -> Result<String, ToolError>;
}

/// The tool subset granted to one worker
#[derive(Clone, Default)]
pub struct ToolSet {
    pub file_store: Option<Arc<dyn FileStore>>,
    pub sandbox: Option<Arc<dyn Sandbox>>,
    pub test_runner: Option<Arc<dyn TestRunner>>,
    pub vcs: Option<Arc<dyn Vcs>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.file_store = Some(store);
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_test_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.test_runner = Some(runner);
        self
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn Vcs>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.file_store.is_none()
            && self.sandbox.is_none()
            && self.test_runner.is_none()
            && self.vcs.is_none()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("file_store", &self.file_store.is_some())
            .field("sandbox", &self.sandbox.is_some())
            .field("test_runner", &self.test_runner.is_some())
            .field("vcs", &self.vcs.is_some())
            .finish()
    }
}
