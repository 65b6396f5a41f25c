//! Error types for the Cadre orchestration core
//!
//! The error taxonomy drives recovery: configuration errors are fatal,
//! transient errors are retried with backoff, shape and soft guardrail
//! failures re-invoke the task with feedback, and invariant violations
//! indicate a bug in the orchestrator itself.

use thiserror::Error;

use crate::llm::LlmError;
use crate::state::Phase;
use crate::tools::ToolError;

/// Result type alias for Cadre operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Cadre operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (missing model, missing workspace root, unresolvable role)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transient failure (LLM timeout, rate limit, brief tool unavailability)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Worker output did not parse as the declared artifact
    #[error("Output shape error: {0}")]
    Shape(String),

    /// A guardrail rejected the task output with no retry path left
    #[error("Guardrail blocked task '{task}': {message}")]
    GuardrailBlocked {
        /// Id of the offending task
        task: String,
        /// Guardrail category that fired
        category: String,
        /// Verdict message
        message: String,
        /// Whether the verdict was critical severity
        critical: bool,
    },

    /// Retry budget exhausted for a task or phase
    #[error("Retry budget exhausted for {scope} after {attempts} attempts")]
    BudgetExhausted {
        /// What ran out of budget (task id or phase name)
        scope: String,
        /// Attempts consumed
        attempts: u32,
    },

    /// Attempted phase transition outside the state machine edges
    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition {
        /// Phase before the attempted transition
        from: Phase,
        /// Attempted target phase
        to: Phase,
    },

    /// Broken internal invariant (duplicate file path, malformed DAG, ...)
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// LLM client error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool invocation error
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// The run was cancelled
    #[error("Run cancelled")]
    Cancelled,
}

impl Error {
    /// True for errors that a backoff retry may resolve
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::Llm(LlmError::Transient(_)) => true,
            Error::Tool(ToolError::Unavailable(_)) => true,
            _ => false,
        }
    }

    /// True for errors that re-invoking the same task with feedback may fix
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Shape(_))
            || matches!(
                self,
                Error::GuardrailBlocked {
                    critical: false,
                    ..
                }
            )
    }
}
