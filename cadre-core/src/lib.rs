//! Cadre Core - autonomous software-delivery orchestration
//!
//! Given a natural-language project description, Cadre drives specialized
//! LLM-backed worker roles through intake, planning, development, testing,
//! and deployment, producing source files, tests, and a deployment bundle.
//! This crate is the orchestration core: the phase state machine, the
//! crew/task scheduler, guardrail-enforced retries, the shared state model,
//! the memory abstraction, error classification with a circuit breaker, and
//! human-feedback suspension.
//!
//! Concrete LLM endpoints, sandboxes, and user interfaces are external;
//! they plug in through the traits in [`llm`] and [`tools`].

pub mod cancel;
pub mod config;
pub mod crew;
pub mod error;
pub mod flow;
pub mod guardrail;
pub mod llm;
pub mod memory;
pub mod model;
pub mod state;
pub mod tools;
pub mod worker;

use std::sync::Arc;

pub use cancel::CancelFlag;
pub use config::RunOptions;
pub use crew::{Crew, CrewContext, CrewOutput, ProcessPolicy, Task};
pub use error::{Error, Result};
pub use flow::{
    feedback_channel, Flow, FeedbackClient, FeedbackGateway, FeedbackHandler, FeedbackKind,
    FeedbackRequest, FeedbackResponse, PhaseCrews, RunOutcome, ScriptedFeedback, StandardCrews,
};
pub use llm::{
    ChatMessage, ChatRole, Completion, CompletionRequest, Embedder, FinishReason, LlmClient,
    LlmError, TokenUsage,
};
pub use memory::{AssociativeMemory, MemoryHandle, MetricsSink, NullMetrics, RelationalMetrics};
pub use model::{
    Architecture, ArtifactKind, CodeFile, DeploymentBundle, FileKind, Requirements, TaskArtifact,
    TestRun,
};
pub use state::{Phase, ProjectState, StateStore};
pub use worker::{RoleProfile, Worker, WorkerConfig};

/// Run a project end to end with the standard crews.
///
/// Memory stays disabled unless an embedder is supplied via
/// [`run_with_embedder`]; the flow is correct either way.
pub async fn run(
    description: &str,
    options: RunOptions,
    llm: Arc<dyn LlmClient>,
) -> Result<RunOutcome> {
    let crews = StandardCrews::new(llm, options.clone()).into_phase_crews();
    let mut flow = Flow::new(options, crews)?;
    flow.run(description).await
}

/// Run a project with associative memory backed by the given embedder
pub async fn run_with_embedder(
    description: &str,
    options: RunOptions,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn Embedder>,
) -> Result<RunOutcome> {
    let memory = if options.memory_enabled {
        MemoryHandle::new(Arc::new(
            AssociativeMemory::new(embedder).with_half_life(options.memory_half_life()),
        ))
    } else {
        MemoryHandle::disabled()
    };
    let crews = StandardCrews::new(llm, options.clone())
        .with_memory(memory.clone())
        .into_phase_crews();
    let mut flow = Flow::new(options, crews)?.with_memory(memory);
    flow.run(description).await
}
