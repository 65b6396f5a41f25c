//! Subprocess-backed LLM client
//!
//! Spawns a configurable agent command per completion, passing the rendered
//! prompt as the final argument and reading the completion from stdout.
//! Spawn and configuration problems are permanent; timeouts and non-zero
//! exits are transient and retried by the worker's backoff loop.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use cadre_core::{ChatRole, Completion, CompletionRequest, FinishReason, LlmClient, LlmError, TokenUsage};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// LLM client that shells out to an agent command
pub struct CommandLlm {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandLlm {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check whether the configured command exists on this system
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    fn render_prompt(request: &CompletionRequest) -> String {
        let mut prompt = String::new();
        for message in &request.messages {
            let tag = match message.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            prompt.push_str(&format!("[{tag}]\n{}\n\n", message.content));
        }
        prompt
    }
}

#[async_trait]
impl LlmClient for CommandLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let prompt = Self::render_prompt(&request);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&prompt)
            .env("CADRE_MODEL", &request.model_id)
            .env("CADRE_ROLE", &request.role)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let spawned = cmd.output();
        let output = match tokio::time::timeout(self.timeout, spawned).await {
            Err(_elapsed) => {
                return Err(LlmError::Transient(format!(
                    "agent command timed out after {:?}",
                    self.timeout
                )));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LlmError::Permanent(format!(
                    "agent command not found: '{}'",
                    self.program
                )));
            }
            Ok(Err(e)) => {
                return Err(LlmError::Transient(format!(
                    "failed to run agent command: {e}"
                )));
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lowered = stderr.to_lowercase();
            if lowered.contains("auth") || lowered.contains("api key") {
                return Err(LlmError::Permanent(format!(
                    "agent command rejected credentials: {}",
                    stderr.trim()
                )));
            }
            return Err(LlmError::Transient(format!(
                "agent command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if stdout.is_empty() {
            return Err(LlmError::Transient("agent command produced no output".to_string()));
        }

        // Token counts are estimated; subprocess agents report text only
        let usage = TokenUsage::new(
            (prompt.len() / 4) as u64,
            (stdout.len() / 4) as u64,
        );
        Ok(Completion {
            text: stdout,
            finish_reason: FinishReason::Stop,
            usage,
        })
    }
}
