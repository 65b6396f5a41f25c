//! The flow: top-level state machine driving crews per phase
//!
//! The flow exclusively owns the project state. It runs one phase at a
//! time, merges crew outputs through invariant-checked mutators, applies
//! routers at phase boundaries, classifies errors for recovery, persists a
//! snapshot on every transition and error, and suspends for human feedback
//! when a phase asks for it. A run always terminates in the complete,
//! error, or awaiting-human phase.

pub mod feedback;
pub mod pipeline;
pub mod recovery;
pub mod routing;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::cancel::CancelFlag;
use crate::config::RunOptions;
use crate::crew::CrewOutput;
use crate::error::{Error, Result};
use crate::guardrail::Verdict;
use crate::memory::{MemoryHandle, MetricsSink, NullMetrics};
use crate::model::TestFeedback;
use crate::state::{FailureReport, Phase, ProjectState, StateStore};
use crate::tools::{FileStore, WorkspaceFileStore};
use crate::worker::backoff_delay;

pub use feedback::{
    feedback_channel, parse_response, FeedbackClient, FeedbackGateway, FeedbackHandler,
    FeedbackKind, FeedbackRequest, FeedbackResponse, ScriptedFeedback,
};
pub use pipeline::StandardCrews;
pub use recovery::{classify, CircuitBreaker, ErrorCategory, CIRCUIT_BREAKER_THRESHOLD};
pub use routing::{
    route_after_deployment, route_after_development, route_after_intake, route_after_planning,
    route_after_testing, DeploymentRoute, DevelopmentRoute, IntakeRoute, PlanningRoute,
    TestingRoute, PLANNING_CONFIDENCE_THRESHOLD,
};

const FEEDBACK_REQUEST_KEY: &str = "feedback_request";
const HUMAN_FEEDBACK_KEY: &str = "human_feedback";
const TEST_FEEDBACK_KEY: &str = "test_feedback";

/// One phase's crew, behind a trait so tests can script outcomes
#[async_trait]
pub trait CrewRunner: Send + Sync {
    async fn run(
        &self,
        state: &ProjectState,
        inputs: &PhaseInputs,
        cancel: &CancelFlag,
    ) -> Result<CrewOutput>;
}

/// Extra inputs threaded into a phase run
#[derive(Debug, Clone, Default)]
pub struct PhaseInputs {
    /// Context blocks for every task: test feedback, human clarifications
    pub extra_context: Vec<String>,
}

/// The crews the flow drives, one per phase
#[derive(Clone)]
pub struct PhaseCrews {
    pub planning: Arc<dyn CrewRunner>,
    pub development: Arc<dyn CrewRunner>,
    pub testing: Arc<dyn CrewRunner>,
    pub deployment: Arc<dyn CrewRunner>,
}

/// Final result of a run
#[derive(Debug)]
pub struct RunOutcome {
    pub project_id: Uuid,
    pub final_phase: Phase,
    pub state: ProjectState,
    /// Set when the run parked awaiting human input
    pub pending_request: Option<FeedbackRequest>,
    pub cancelled: bool,
}

enum Step {
    Continue,
    Park(FeedbackRequest),
}

/// Top-level orchestrator for one project run
pub struct Flow {
    options: RunOptions,
    crews: PhaseCrews,
    store: StateStore,
    feedback: Option<Arc<dyn FeedbackHandler>>,
    metrics: Arc<dyn MetricsSink>,
    memory: MemoryHandle,
    cancel: CancelFlag,
    breaker: CircuitBreaker,
    backoff_base: Duration,
    last_warnings: Vec<Verdict>,
    staged_response: Option<String>,
}

impl Flow {
    pub fn new(options: RunOptions, crews: PhaseCrews) -> Result<Self> {
        options.validate()?;
        let store = StateStore::new(options.persist_dir.clone());
        Ok(Self {
            options,
            crews,
            store,
            feedback: None,
            metrics: Arc::new(NullMetrics),
            memory: MemoryHandle::disabled(),
            cancel: CancelFlag::new(),
            breaker: CircuitBreaker::default(),
            backoff_base: Duration::from_secs(1),
            last_warnings: Vec::new(),
            staged_response: None,
        })
    }

    pub fn with_feedback_handler(mut self, handler: Arc<dyn FeedbackHandler>) -> Self {
        self.feedback = Some(handler);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_memory(mut self, memory: MemoryHandle) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Flag callers can use to cancel the run from another task
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run a project from a fresh description
    pub async fn run(&mut self, description: &str) -> Result<RunOutcome> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::Config("empty project description".to_string()));
        }
        let state =
            ProjectState::new(description).with_max_retries(self.options.max_retries);
        self.store.save_snapshot(&state)?;
        self.metrics.run_started(&state.project_id, state.started_at);
        tracing::info!(project_id = %state.project_id, "run started");
        self.drive(state).await
    }

    /// Resume a run from its last snapshot
    pub async fn resume(&mut self, project_id: &Uuid) -> Result<RunOutcome> {
        let state = self.store.load(project_id)?;
        tracing::info!(project_id = %project_id, phase = %state.phase, "run resumed from snapshot");
        self.drive(state).await
    }

    /// Resume a parked run, supplying the response to its pending
    /// feedback request
    pub async fn resume_with(
        &mut self,
        project_id: &Uuid,
        response: impl Into<String>,
    ) -> Result<RunOutcome> {
        self.staged_response = Some(response.into());
        self.resume(project_id).await
    }

    async fn drive(&mut self, mut state: ProjectState) -> Result<RunOutcome> {
        loop {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled(state);
            }
            match state.phase {
                Phase::Intake => self.step_intake(&mut state)?,
                Phase::Planning
                | Phase::Development
                | Phase::Testing
                | Phase::Deployment => {
                    let phase = state.phase;
                    match self.step_crewed(&mut state, phase).await {
                        Ok(()) => {}
                        Err(Error::Cancelled) => return self.finish_cancelled(state),
                        Err(other) => return Err(other),
                    }
                }
                Phase::AwaitingHuman => match self.step_awaiting(&mut state).await? {
                    Step::Continue => {}
                    Step::Park(request) => {
                        tracing::info!(
                            project_id = %state.project_id,
                            request_id = %request.id,
                            "run parked awaiting human input"
                        );
                        return Ok(RunOutcome {
                            project_id: state.project_id,
                            final_phase: Phase::AwaitingHuman,
                            pending_request: Some(request),
                            state,
                            cancelled: false,
                        });
                    }
                },
                Phase::Complete | Phase::Error => break,
            }
        }

        self.metrics
            .run_finished(&state.project_id, Utc::now(), state.phase.name());
        self.memory.purge_project(&state.project_id).await;
        tracing::info!(project_id = %state.project_id, summary = %state.summary(), "run finished");
        Ok(RunOutcome {
            project_id: state.project_id,
            final_phase: state.phase,
            pending_request: None,
            state,
            cancelled: false,
        })
    }

    fn finish_cancelled(&mut self, mut state: ProjectState) -> Result<RunOutcome> {
        tracing::warn!(project_id = %state.project_id, phase = %state.phase, "run cancelled");
        let phase = state.phase;
        state.record_error(phase, "cancelled", "run cancelled", false);
        if let Some(record) = state.errors.last() {
            let _ = self.store.append_error(&state.project_id, record);
        }

        if state.phase == Phase::AwaitingHuman {
            if let Some(origin) = state.suspended_from {
                let _ = state.transition_to(origin, "cancelled");
            }
        }
        if !state.phase.is_terminal() {
            let _ = state.transition_to(Phase::Error, "cancelled");
        }
        let _ = self.store.save_snapshot(&state);
        self.metrics
            .run_finished(&state.project_id, Utc::now(), state.phase.name());
        Ok(RunOutcome {
            project_id: state.project_id,
            final_phase: state.phase,
            pending_request: None,
            state,
            cancelled: true,
        })
    }

    // -----------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------

    fn step_intake(&mut self, state: &mut ProjectState) -> Result<()> {
        let clarified = state.metadata.contains_key(HUMAN_FEEDBACK_KEY);
        match route_after_intake(&state.description, self.options.description_cap, clarified) {
            IntakeRoute::Proceed => self.transition(state, Phase::Planning, "input validated"),
            IntakeRoute::Clarify { question } => {
                let request = FeedbackRequest::new(question, FeedbackKind::Clarification)
                    .with_context_digest(state.summary());
                self.stage_request(state, request)
            }
            IntakeRoute::Reject { reason } => {
                self.record_error(state, Phase::Intake, "security", &reason, false)?;
                self.fail_run(state, &reason)
            }
        }
    }

    // -----------------------------------------------------------------
    // Crewed phases
    // -----------------------------------------------------------------

    async fn step_crewed(&mut self, state: &mut ProjectState, phase: Phase) -> Result<()> {
        let runner = match phase {
            Phase::Planning => self.crews.planning.clone(),
            Phase::Development => self.crews.development.clone(),
            Phase::Testing => self.crews.testing.clone(),
            Phase::Deployment => self.crews.deployment.clone(),
            other => {
                return Err(Error::Invariant(format!(
                    "phase {other} has no crew"
                )))
            }
        };
        let inputs = self.phase_inputs(state, phase);
        let started = Instant::now();

        match runner.run(state, &inputs, &self.cancel).await {
            Ok(output) => {
                self.breaker.reset(phase);
                self.last_warnings = output.warnings.clone();
                self.record_phase_metrics(state, phase, Some(&output), started, "success");
                self.apply_phase_output(state, phase, output).await
            }
            Err(error) => {
                self.record_phase_metrics(state, phase, None, started, "failure");
                self.handle_phase_error(state, phase, error).await
            }
        }
    }

    fn phase_inputs(&self, state: &ProjectState, phase: Phase) -> PhaseInputs {
        let mut extra = Vec::new();
        if phase == Phase::Development {
            if let Some(value) = state.metadata.get(TEST_FEEDBACK_KEY) {
                if let Ok(feedback) = serde_json::from_value::<TestFeedback>(value.clone()) {
                    extra.push(feedback.render());
                }
            }
        }
        if let Some(value) = state.metadata.get(HUMAN_FEEDBACK_KEY) {
            if let Ok(response) = serde_json::from_value::<FeedbackResponse>(value.clone()) {
                if !response.free_text.is_empty() {
                    extra.push(format!("Operator clarification: {}", response.free_text));
                }
            }
        }
        PhaseInputs {
            extra_context: extra,
        }
    }

    async fn apply_phase_output(
        &mut self,
        state: &mut ProjectState,
        phase: Phase,
        output: CrewOutput,
    ) -> Result<()> {
        match phase {
            Phase::Planning => self.apply_planning(state, output),
            Phase::Development => self.apply_development(state, output).await,
            Phase::Testing => self.apply_testing(state, output),
            Phase::Deployment => self.apply_deployment(state, output),
            other => Err(Error::Invariant(format!(
                "no output application for phase {other}"
            ))),
        }
    }

    fn apply_planning(&mut self, state: &mut ProjectState, output: CrewOutput) -> Result<()> {
        if let Some(requirements) = output.get("requirements").and_then(|a| a.as_requirements()) {
            state.requirements = Some(requirements.clone());
        }
        if let Some(architecture) = output.get("architecture").and_then(|a| a.as_architecture()) {
            state.architecture = Some(architecture.clone());
        }
        self.store.save_snapshot(state)?;

        match route_after_planning(state) {
            PlanningRoute::Proceed => {
                state.metadata.remove(HUMAN_FEEDBACK_KEY);
                self.transition(state, Phase::Development, "planning complete")
            }
            PlanningRoute::Clarify {
                question,
                confidence,
            } => {
                let request = FeedbackRequest::new(question, FeedbackKind::Approval)
                    .with_options(vec![
                        "Proceed as-is".to_string(),
                        "Add clarification (type below)".to_string(),
                    ])
                    .with_default_option("Proceed as-is")
                    .with_context_digest(format!(
                        "phase=planning confidence={confidence:.2} {}",
                        state.summary()
                    ));
                self.stage_request(state, request)
            }
            PlanningRoute::Fail { reason } => {
                self.retry_or_escalate(state, Phase::Planning, &reason)
            }
        }
    }

    async fn apply_development(&mut self, state: &mut ProjectState, output: CrewOutput) -> Result<()> {
        let mut generated = Vec::new();
        for artifact in output.outputs.values() {
            if let Some(files) = artifact.as_code_files() {
                generated.extend(files.iter().cloned());
            }
        }
        state.upsert_files(generated)?;
        self.materialize_workspace(state).await?;
        self.store.save_snapshot(state)?;

        match route_after_development(state) {
            DevelopmentRoute::Proceed => self.transition(state, Phase::Testing, "code generated"),
            DevelopmentRoute::Fail { reason } => {
                self.retry_or_escalate(state, Phase::Development, &reason)
            }
        }
    }

    fn apply_testing(&mut self, state: &mut ProjectState, output: CrewOutput) -> Result<()> {
        let Some(run) = output
            .get("execute_tests")
            .and_then(|a| a.as_test_report())
            .cloned()
        else {
            return self.retry_or_escalate(state, Phase::Testing, "testing produced no report");
        };
        state.test_results = Some(run.clone());
        self.store.save_snapshot(state)?;

        let suggested_fixes = output
            .get("review")
            .map(|artifact| {
                artifact
                    .render_for_context()
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .take(10)
                    .map(|line| line.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        match route_after_testing(&run, state, self.options.coverage_threshold, suggested_fixes) {
            TestingRoute::Deploy => {
                state.metadata.remove(TEST_FEEDBACK_KEY);
                self.transition(state, Phase::Deployment, "tests passed")
            }
            TestingRoute::RetryDevelopment(test_feedback) => {
                state.increment_retry(Phase::Testing)?;
                state.metadata.insert(
                    TEST_FEEDBACK_KEY.to_string(),
                    serde_json::to_value(&test_feedback)?,
                );
                self.transition(state, Phase::Development, "tests failed, retrying development")
            }
            TestingRoute::Escalate { reason } => {
                self.record_error(state, Phase::Testing, "budget_exhausted", &reason, true)?;
                let request = self.escalation_request(state, Phase::Testing, &reason);
                self.stage_request(state, request)
            }
        }
    }

    fn apply_deployment(&mut self, state: &mut ProjectState, output: CrewOutput) -> Result<()> {
        let mut bundle = output
            .get("packaging")
            .and_then(|a| a.as_deployment())
            .cloned()
            .unwrap_or_default();
        if bundle.runbook.trim().is_empty() {
            if let Some(docs) = output.get("documentation") {
                bundle.runbook = docs.render_for_context();
            }
        }
        if let Some(infrastructure) = output.get("infrastructure") {
            state.metadata.insert(
                "infrastructure_design".to_string(),
                serde_json::Value::String(infrastructure.render_for_context()),
            );
        }
        state.deployment = Some(bundle.clone());
        self.store.save_snapshot(state)?;

        match route_after_deployment(&bundle) {
            DeploymentRoute::Complete => self.transition(state, Phase::Complete, "bundle ready"),
            DeploymentRoute::Fail { reason } => {
                self.retry_or_escalate(state, Phase::Deployment, &reason)
            }
        }
    }

    /// Write every committed file into the run's workspace subtree.
    ///
    /// All writes go through the workspace file store, so the root
    /// whitelist, traversal and symlink checks, size cap, per-path locks,
    /// and audit log apply to the files that actually land on disk.
    async fn materialize_workspace(&self, state: &ProjectState) -> Result<()> {
        self.store.prepare(&state.project_id)?;
        let mut roots = vec![self.store.workspace_dir(&state.project_id)];
        roots.extend(self.options.workspace_roots.clone());
        let workspace = WorkspaceFileStore::new(roots);
        for file in &state.files {
            workspace.write(&file.path, file.content.as_bytes()).await?;
        }
        tracing::debug!(
            project_id = %state.project_id,
            files = state.files.len(),
            "workspace materialized"
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Error handling
    // -----------------------------------------------------------------

    async fn handle_phase_error(
        &mut self,
        state: &mut ProjectState,
        phase: Phase,
        error: Error,
    ) -> Result<()> {
        let count = self.breaker.record_failure(phase);
        let message = error.to_string();

        if matches!(error, Error::BudgetExhausted { .. }) {
            self.record_error(state, phase, "budget_exhausted", &message, true)?;
            return self.escalate_or_fail(state, phase, &message);
        }

        match classify(&error) {
            ErrorCategory::Transient => {
                self.record_error(state, phase, "transient", &message, true)?;
                if self.breaker.should_escalate(phase) {
                    return self.escalate_or_fail(
                        state,
                        phase,
                        &format!("circuit breaker tripped after {count} consecutive failures"),
                    );
                }
                if !state.can_retry(phase) {
                    return self.escalate_or_fail(state, phase, "retry budget exhausted");
                }
                state.increment_retry(phase)?;
                self.store.save_snapshot(state)?;
                let delay = backoff_delay(count.saturating_sub(1), self.backoff_base);
                tracing::info!(phase = %phase, delay_ms = delay.as_millis() as u64, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ErrorCategory::Recoverable => {
                self.record_error(state, phase, "recoverable", &message, true)?;
                if self.breaker.should_escalate(phase) {
                    return self.escalate_or_fail(
                        state,
                        phase,
                        &format!("circuit breaker tripped after {count} consecutive failures"),
                    );
                }
                self.retry_or_escalate(state, phase, &message)
            }
            ErrorCategory::Fatal => {
                self.record_error(state, phase, "fatal", &message, false)?;
                self.fail_run(state, &message)
            }
        }
    }

    /// Re-run the phase while budget remains, otherwise escalate or fail
    fn retry_or_escalate(
        &mut self,
        state: &mut ProjectState,
        phase: Phase,
        reason: &str,
    ) -> Result<()> {
        if state.can_retry(phase) {
            state.increment_retry(phase)?;
            self.store.save_snapshot(state)?;
            tracing::info!(phase = %phase, reason, "re-running phase");
            Ok(())
        } else {
            self.escalate_or_fail(state, phase, reason)
        }
    }

    /// Budget is gone: suspend for a human where the phase allows it,
    /// otherwise move the run to the error phase
    fn escalate_or_fail(
        &mut self,
        state: &mut ProjectState,
        phase: Phase,
        reason: &str,
    ) -> Result<()> {
        if phase.supports_escalation() && state.phase == phase {
            let request = self.escalation_request(state, phase, reason);
            self.stage_request(state, request)
        } else {
            self.fail_run(state, reason)
        }
    }

    fn escalation_request(
        &self,
        state: &ProjectState,
        phase: Phase,
        reason: &str,
    ) -> FeedbackRequest {
        let question = match phase {
            Phase::Testing => format!(
                "Tests are still failing after {} retries ({reason}). \
                 Retry development with your feedback, or abort?",
                state.retry_count(Phase::Testing)
            ),
            _ => format!("Phase {phase} cannot make progress ({reason}). How should the run proceed?"),
        };
        FeedbackRequest::new(question, FeedbackKind::Escalation)
            .with_options(vec![
                "Retry with feedback".to_string(),
                "Abort".to_string(),
            ])
            .with_default_option("Abort")
            .with_context_digest(state.summary())
    }

    /// Terminal failure: record, transition to the error phase, and write
    /// the failure report
    fn fail_run(&mut self, state: &mut ProjectState, reason: &str) -> Result<()> {
        self.transition(state, Phase::Error, reason)?;
        self.write_failure_report(state);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Human feedback
    // -----------------------------------------------------------------

    fn stage_request(&mut self, state: &mut ProjectState, request: FeedbackRequest) -> Result<()> {
        state.metadata.insert(
            FEEDBACK_REQUEST_KEY.to_string(),
            serde_json::to_value(&request)?,
        );
        self.transition(
            state,
            Phase::AwaitingHuman,
            &format!("{:?} requested", request.kind),
        )
    }

    async fn step_awaiting(&mut self, state: &mut ProjectState) -> Result<Step> {
        let request: FeedbackRequest = state
            .metadata
            .get(FEEDBACK_REQUEST_KEY)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_else(|| {
                FeedbackRequest::new("How should the run proceed?", FeedbackKind::Clarification)
            });
        let origin = state.suspended_from.ok_or_else(|| {
            Error::Invariant("awaiting human input with no suspension origin".to_string())
        })?;

        let raw = if let Some(staged) = self.staged_response.take() {
            Some(staged)
        } else if let Some(handler) = self.feedback.clone() {
            match self.options.feedback_timeout() {
                Some(timeout) => tokio::time::timeout(timeout, handler.request(&request))
                    .await
                    .ok()
                    .flatten(),
                None => handler.request(&request).await,
            }
        } else {
            None
        };

        let raw = match raw {
            Some(raw) => raw,
            None => match request.default_option.clone() {
                Some(default) => {
                    tracing::info!(
                        request_id = %request.id,
                        default = %default,
                        "no feedback received, taking default action"
                    );
                    default
                }
                None => return Ok(Step::Park(request)),
            },
        };

        let response = parse_response(&raw, &request.options, request.kind);
        tracing::info!(
            request_id = %request.id,
            selected = ?response.selected_option,
            accepted = response.accepted,
            "human feedback received"
        );
        state.metadata.insert(
            HUMAN_FEEDBACK_KEY.to_string(),
            serde_json::to_value(&response)?,
        );
        state.metadata.remove(FEEDBACK_REQUEST_KEY);
        self.transition(state, origin, "human response received")?;

        match origin {
            Phase::Intake => {
                if !response.free_text.is_empty() {
                    state.description = format!(
                        "{}\n\nClarification: {}",
                        state.description, response.free_text
                    );
                    self.store.save_snapshot(state)?;
                }
            }
            Phase::Planning => {
                if request.kind == FeedbackKind::Escalation && !response.accepted {
                    return self.fail_run(state, "aborted by operator").map(|_| Step::Continue);
                }
                if response.accepted
                    && response.free_text.is_empty()
                    && state.requirements.is_some()
                    && state.architecture.is_some()
                {
                    self.transition(state, Phase::Development, "plan approved by operator")?;
                }
                // Otherwise planning re-runs with the clarification in context
            }
            Phase::Testing => {
                if response.accepted {
                    state.retries.insert(Phase::Testing.name().to_string(), 0);
                    self.breaker.reset(Phase::Testing);
                    self.transition(
                        state,
                        Phase::Development,
                        "operator requested retry with feedback",
                    )?;
                } else {
                    self.fail_run(state, "aborted by operator")?;
                }
            }
            other => {
                tracing::warn!(origin = %other, "no post-resume routing, re-running origin phase");
            }
        }
        Ok(Step::Continue)
    }

    // -----------------------------------------------------------------
    // Persistence and metrics
    // -----------------------------------------------------------------

    fn transition(&mut self, state: &mut ProjectState, to: Phase, reason: &str) -> Result<()> {
        state.transition_to(to, reason)?;
        if let Some(transition) = state.transitions.last() {
            self.store.append_transition(&state.project_id, transition)?;
        }
        self.store.save_snapshot(state)?;
        Ok(())
    }

    fn record_error(
        &mut self,
        state: &mut ProjectState,
        phase: Phase,
        kind: &str,
        message: &str,
        recoverable: bool,
    ) -> Result<()> {
        state.record_error(phase, kind, message, recoverable);
        if let Some(record) = state.errors.last() {
            self.store.append_error(&state.project_id, record)?;
        }
        self.store.save_snapshot(state)?;
        Ok(())
    }

    fn write_failure_report(&self, state: &ProjectState) {
        let report = FailureReport {
            project_id: state.project_id,
            phase: state
                .suspended_from
                .unwrap_or(state.phase)
                .name()
                .to_string(),
            errors: state.errors.clone(),
            last_verdicts: self.last_warnings.clone(),
            last_output: state.errors.last().map(|e| e.message.clone()),
            retries: state.retries.clone(),
        };
        if let Err(error) = self.store.write_failure_report(&report) {
            tracing::warn!(%error, "failed to write failure report");
        }
    }

    fn record_phase_metrics(
        &self,
        state: &ProjectState,
        phase: Phase,
        output: Option<&CrewOutput>,
        started: Instant,
        outcome: &str,
    ) {
        let usage = output.map(|o| o.usage).unwrap_or_default();
        self.metrics.phase_completed(
            &state.project_id,
            phase.name(),
            started.elapsed().as_millis() as i64,
            state.retry_count(phase),
            usage,
            outcome,
        );
        if let Some(output) = output {
            for (role, activity) in &output.role_usage {
                self.metrics.role_activity(
                    role,
                    &activity.model_id,
                    activity.invocations,
                    activity.usage,
                    activity.failures,
                );
            }
        }
    }
}
