//! Workers: role-bound LLM invokers
//!
//! A worker binds a role profile, a resolved model id, an LLM handle, a tool
//! subset, and a memory handle. `invoke` assembles context, calls the model
//! with backoff on transient failures, loops on tool directives, and coerces
//! the final text into the task's declared artifact. Workers know nothing
//! about guardrails; those run above them in the crew layer.

pub mod coerce;

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelFlag;
use crate::error::{Error, Result};
use crate::llm::{
    ChatMessage, Completion, CompletionRequest, FinishReason, LlmClient, LlmError, TokenUsage,
};
use crate::memory::MemoryHandle;
use crate::model::{ArtifactKind, TaskArtifact};
use crate::tools::ToolSet;

pub use coerce::{coerce, strip_code_fences};

/// Backoff delays for transient LLM failures, in units of the configured
/// base (1s by default): 1s, 2s, 4s, 8s, then capped
pub const BACKOFF_STEPS: &[u32] = &[1, 2, 4, 8];

/// Delay before the given 0-based retry attempt
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let step = BACKOFF_STEPS
        .get(attempt as usize)
        .copied()
        .unwrap_or(*BACKOFF_STEPS.last().expect("backoff steps non-empty"));
    base * step
}

/// Role identity: who the worker is and how it behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleProfile {
    /// Stable role name (e.g. `backend_developer`)
    pub name: String,
    /// What the role is trying to achieve
    pub goal: String,
    /// Voice and working style injected into the system prompt
    pub persona: String,
}

impl RoleProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            goal: String::new(),
            persona: String::new(),
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Render the system prompt for this role
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are the {} on a software delivery team.", self.name);
        if !self.goal.is_empty() {
            prompt.push_str(&format!(" Your goal: {}.", self.goal));
        }
        if !self.persona.is_empty() {
            prompt.push_str(&format!(" {}", self.persona));
        }
        prompt.push_str(
            " Respond with exactly the requested output format and nothing else.",
        );
        prompt
    }
}

/// Per-invocation knobs
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Retry bound for transient LLM failures within one call
    pub max_llm_retries: u32,
    /// Cap on the reason/tool loop per invocation
    pub max_iterations: u32,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Base unit for exponential backoff; tests shrink this
    pub backoff_base: Duration,
    /// Timeout for sandboxed executions requested by the model
    pub exec_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_llm_retries: 3,
            max_iterations: 8,
            temperature: 0.2,
            max_output_tokens: 4096,
            backoff_base: Duration::from_secs(1),
            exec_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything a single invocation needs from the caller
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub task_id: String,
    pub description: String,
    pub expected: ArtifactKind,
    /// `(task_id, rendered_output)` pairs for declared dependencies
    pub dependencies: Vec<(String, String)>,
    /// Memory scope to recall from and remember into
    pub memory_scope: Option<String>,
    /// Accumulated guardrail/shape feedback from prior attempts
    pub feedback: Vec<String>,
}

impl InvocationContext {
    pub fn new(
        task_id: impl Into<String>,
        description: impl Into<String>,
        expected: ArtifactKind,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            description: description.into(),
            expected,
            dependencies: Vec::new(),
            memory_scope: None,
            feedback: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, task_id: impl Into<String>, output: impl Into<String>) -> Self {
        self.dependencies.push((task_id.into(), output.into()));
        self
    }

    pub fn with_memory_scope(mut self, scope: impl Into<String>) -> Self {
        self.memory_scope = Some(scope.into());
        self
    }

    pub fn with_feedback(mut self, feedback: Vec<String>) -> Self {
        self.feedback = feedback;
        self
    }
}

/// Result of one successful invocation
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub artifact: TaskArtifact,
    pub raw_text: String,
    pub usage: TokenUsage,
    /// Reason/tool loop iterations consumed
    pub iterations: u32,
}

/// A role-bound LLM invoker
pub struct Worker {
    role: RoleProfile,
    model_id: String,
    llm: Arc<dyn LlmClient>,
    tools: ToolSet,
    memory: MemoryHandle,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(role: RoleProfile, model_id: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            role,
            model_id: model_id.into(),
            llm,
            tools: ToolSet::new(),
            memory: MemoryHandle::disabled(),
            config: WorkerConfig::default(),
        }
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_memory(mut self, memory: MemoryHandle) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn role_name(&self) -> &str {
        &self.role.name
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Iteration cap applied to the reason/tool loop
    pub fn max_iterations(&self) -> u32 {
        self.config.max_iterations
    }

    /// Execute one task attempt: assemble context, call the model, run any
    /// requested tools, and coerce the final text.
    pub async fn invoke(
        &self,
        ctx: &InvocationContext,
        cancel: &CancelFlag,
    ) -> Result<WorkerOutput> {
        cancel.check()?;
        let mut messages = self.assemble_messages(ctx).await;
        let mut usage = TokenUsage::default();
        let mut iterations = 0u32;
        let mut final_text;

        loop {
            cancel.check()?;
            let request = CompletionRequest {
                role: self.role.name.clone(),
                messages: messages.clone(),
                model_id: self.model_id.clone(),
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                response_schema: Some(ctx.expected.schema_hint().to_string()),
                stop: Vec::new(),
            };
            let completion = self.complete_with_retry(request, cancel).await?;
            usage.add(completion.usage);
            iterations += 1;
            final_text = completion.text.clone();

            if completion.finish_reason != FinishReason::Tool {
                break;
            }
            if iterations >= self.config.max_iterations {
                tracing::warn!(
                    role = %self.role.name,
                    task = %ctx.task_id,
                    iterations,
                    "iteration cap reached mid tool loop"
                );
                break;
            }
            let result_text = self.run_tool_directive(&completion.text).await;
            messages.push(ChatMessage::assistant(completion.text));
            messages.push(ChatMessage::tool(result_text));
        }

        let artifact = coerce(&final_text, ctx.expected)?;

        if let Some(ref scope) = ctx.memory_scope {
            let mut metadata = BTreeMap::new();
            metadata.insert("role".to_string(), self.role.name.clone());
            metadata.insert("task".to_string(), ctx.task_id.clone());
            let note = format!("task {}: {}", ctx.task_id, truncate(&final_text, 600));
            self.memory.remember(scope, note, metadata).await;
        }

        tracing::info!(
            role = %self.role.name,
            task = %ctx.task_id,
            iterations,
            tokens = %usage,
            "worker invocation complete"
        );
        Ok(WorkerOutput {
            artifact,
            raw_text: final_text,
            usage,
            iterations,
        })
    }

    /// Build the message stack: role template, task, dependencies, memory
    /// recall, accumulated feedback.
    async fn assemble_messages(&self, ctx: &InvocationContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(self.role.system_prompt())];

        let mut body = format!(
            "Task: {}\n\nExpected output ({}), as JSON:\n{}\n",
            ctx.description,
            ctx.expected,
            ctx.expected.schema_hint()
        );
        for (dep_id, output) in &ctx.dependencies {
            body.push_str(&format!("\n--- Output of dependency '{dep_id}' ---\n{output}\n"));
        }
        if let Some(ref scope) = ctx.memory_scope {
            let recalled = self.memory.recall(scope, &ctx.description, 4).await;
            if !recalled.is_empty() {
                body.push_str("\n--- Relevant notes from earlier work ---\n");
                for hit in recalled {
                    body.push_str(&format!("- {}\n", truncate(&hit.content, 400)));
                }
            }
        }
        for feedback in &ctx.feedback {
            body.push_str(&format!(
                "\n--- Feedback on your previous attempt ---\n{feedback}\n"
            ));
        }
        messages.push(ChatMessage::user(body));
        messages
    }

    /// Call the LLM, retrying transient failures with exponential backoff
    async fn complete_with_retry(
        &self,
        request: CompletionRequest,
        cancel: &CancelFlag,
    ) -> Result<Completion> {
        let mut last_error = String::new();
        for attempt in 0..=self.config.max_llm_retries {
            cancel.check()?;
            match self.llm.complete(request.clone()).await {
                Ok(completion) => return Ok(completion),
                Err(LlmError::Permanent(message)) => {
                    return Err(Error::Llm(LlmError::Permanent(message)));
                }
                Err(LlmError::Transient(message)) => {
                    last_error = message;
                    if attempt < self.config.max_llm_retries {
                        let delay = backoff_delay(attempt, self.config.backoff_base);
                        tracing::warn!(
                            role = %self.role.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "transient LLM failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(Error::Transient(format!(
            "LLM retries exhausted after {} attempts: {last_error}",
            self.config.max_llm_retries + 1
        )))
    }

    /// Execute one tool directive emitted by the model. Failures are
    /// reported back into the conversation instead of failing the attempt.
    async fn run_tool_directive(&self, text: &str) -> String {
        #[derive(Deserialize)]
        struct Directive {
            tool: String,
            #[serde(default)]
            args: serde_json::Value,
        }

        let payload = strip_code_fences(text);
        let directive: Directive = match serde_json::from_str(payload) {
            Ok(directive) => directive,
            Err(e) => return format!("tool error: directive is not valid JSON: {e}"),
        };
        let arg = |key: &str| -> String {
            directive.args[key].as_str().unwrap_or_default().to_string()
        };

        match directive.tool.as_str() {
            "read_file" => match &self.tools.file_store {
                Some(store) => match store.read(&arg("path")).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => format!("tool error: {e}"),
                },
                None => "tool error: file store not available for this role".to_string(),
            },
            "write_file" => match &self.tools.file_store {
                Some(store) => {
                    match store.write(&arg("path"), arg("content").as_bytes()).await {
                        Ok(()) => format!("wrote {}", arg("path")),
                        Err(e) => format!("tool error: {e}"),
                    }
                }
                None => "tool error: file store not available for this role".to_string(),
            },
            "list_dir" => match &self.tools.file_store {
                Some(store) => match store.list(&arg("dir")).await {
                    Ok(entries) => entries
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Err(e) => format!("tool error: {e}"),
                },
                None => "tool error: file store not available for this role".to_string(),
            },
            "run_tests" => match &self.tools.test_runner {
                Some(runner) => {
                    match runner.run(&arg("tests_path"), &arg("source_path")).await {
                        Ok(run) => serde_json::to_string(&run)
                            .unwrap_or_else(|_| run.summary()),
                        Err(e) => format!("tool error: {e}"),
                    }
                }
                None => "tool error: test runner not available for this role".to_string(),
            },
            "execute" => match &self.tools.sandbox {
                Some(sandbox) => {
                    match sandbox
                        .execute(&arg("language"), &arg("source"), self.config.exec_timeout, &[])
                        .await
                    {
                        Ok(outcome) => format!(
                            "exit {}\nstdout:\n{}\nstderr:\n{}",
                            outcome.exit_code, outcome.stdout, outcome.stderr
                        ),
                        Err(e) => format!("tool error: {e}"),
                    }
                }
                None => "tool error: sandbox not available for this role".to_string(),
            },
            other => format!("tool error: unknown tool '{other}'"),
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("role", &self.role.name)
            .field("model_id", &self.model_id)
            .field("tools", &self.tools)
            .finish()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
