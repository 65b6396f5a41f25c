//! LLM and embedder client contracts
//!
//! The core never talks to a concrete model endpoint; it depends on these
//! traits only. Implementations live outside the core (the CLI ships a
//! subprocess-backed client) and test code uses scripted mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
        }
    }
}

/// A completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Worker role issuing the request (for logging and per-role metrics)
    pub role: String,
    /// Conversation so far
    pub messages: Vec<ChatMessage>,
    /// Model identifier resolved for the role
    pub model_id: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Output token cap
    pub max_output_tokens: u32,
    /// Optional JSON schema hint for structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<String>,
    /// Optional stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// Natural completion
    Stop,
    /// Output token cap reached
    Length,
    /// Model emitted a tool call directive
    Tool,
    /// Provider-side error surfaced in-band
    Error,
}

/// Token accounting for a single completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Accumulate another usage record into this one
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

impl fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in / {} out", self.input, self.output)
    }
}

/// A completed model response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

impl Completion {
    /// Convenience constructor for a natural completion
    pub fn stop(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            usage,
        }
    }
}

/// LLM client error, split by retryability
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// Timeout, rate limit, 5xx: retry with backoff
    #[error("transient LLM failure: {0}")]
    Transient(String),
    /// Configuration, auth, unknown model: do not retry
    #[error("permanent LLM failure: {0}")]
    Permanent(String),
}

/// Chat/completion endpoint contract
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete the given request, returning text plus accounting
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}

/// Embedding endpoint contract
///
/// Embedder failures are not fatal: the memory layer degrades to disabled
/// for the affected call.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a text into a dense vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
        assert_eq!(ChatMessage::user("u").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("a").role, ChatRole::Assistant);
        assert_eq!(ChatMessage::tool("t").role, ChatRole::Tool);
    }

    #[test]
    fn test_usage_accumulation() {
        let mut usage = TokenUsage::new(10, 5);
        usage.add(TokenUsage::new(3, 7));
        assert_eq!(usage.input, 13);
        assert_eq!(usage.output, 12);
        assert_eq!(usage.total(), 25);
    }

    #[test]
    fn test_finish_reason_serde() {
        let json = serde_json::to_string(&FinishReason::Tool).unwrap();
        assert_eq!(json, "\"tool\"");
        let parsed: FinishReason = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, FinishReason::Tool);
    }

    #[test]
    fn test_error_retryability_split() {
        let transient = LlmError::Transient("rate limit".into());
        let permanent = LlmError::Permanent("unknown model".into());
        assert!(transient.to_string().contains("transient"));
        assert!(permanent.to_string().contains("permanent"));
    }
}
