//! Crews: bounded groups of workers executing a task DAG
//!
//! A crew owns an ordered task list, its dependency DAG, a process policy,
//! and the per-task guardrail chains. Sequential crews walk the DAG in
//! topological order; coordinated crews let a coordinator assign tasks and
//! run independent ones concurrently, bounded by the LLM capacity and an
//! active-task-per-worker cap. The crew fails fast on the first critical
//! verdict or exhausted retry budget.

pub mod task;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::cancel::CancelFlag;
use crate::error::{Error, Result};
use crate::guardrail::behavioral::delegation_verdict;
use crate::guardrail::{ChainOutcome, GuardrailContext, Verdict};
use crate::llm::TokenUsage;
use crate::model::{Architecture, Requirements, TaskArtifact};
use crate::worker::{InvocationContext, Worker};

pub use task::{topological_order, Task};

/// How a crew schedules its tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPolicy {
    /// Strict topological order, one task at a time
    Sequential,
    /// Coordinator-assigned execution; independent tasks run concurrently
    Coordinated {
        /// Maximum tasks one worker role may have in flight
        max_active_per_worker: usize,
    },
}

/// Read-only inputs a crew runs against
#[derive(Debug, Clone)]
pub struct CrewContext {
    pub project_id: Uuid,
    pub requirements: Option<Requirements>,
    pub architecture: Option<Architecture>,
    /// Extra context blocks appended to every task (test feedback, human
    /// clarifications)
    pub extra_context: Vec<String>,
    pub workspace_roots: Vec<PathBuf>,
    pub coverage_threshold: f64,
    pub quality_score_threshold: f64,
    pub dependency_blocklist: Vec<String>,
}

impl CrewContext {
    pub fn new(project_id: Uuid) -> Self {
        Self {
            project_id,
            requirements: None,
            architecture: None,
            extra_context: Vec::new(),
            workspace_roots: Vec::new(),
            coverage_threshold: 0.8,
            quality_score_threshold: 7.0,
            dependency_blocklist: Vec::new(),
        }
    }

    pub fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = Some(requirements);
        self
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = Some(architecture);
        self
    }

    pub fn with_extra_context(mut self, extra: Vec<String>) -> Self {
        self.extra_context = extra;
        self
    }

    pub fn with_workspace_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.workspace_roots = roots;
        self
    }

    pub fn with_coverage_threshold(mut self, threshold: f64) -> Self {
        self.coverage_threshold = threshold;
        self
    }

    pub fn with_quality_score_threshold(mut self, threshold: f64) -> Self {
        self.quality_score_threshold = threshold;
        self
    }

    pub fn with_dependency_blocklist(mut self, blocklist: Vec<String>) -> Self {
        self.dependency_blocklist = blocklist;
        self
    }
}

/// Per-role accounting across one kickoff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleUsage {
    pub model_id: String,
    pub invocations: u32,
    pub failures: u32,
    pub usage: TokenUsage,
}

/// Merged result of a crew kickoff
#[derive(Debug, Clone, Default)]
pub struct CrewOutput {
    /// Committed artifact per task id
    pub outputs: BTreeMap<String, TaskArtifact>,
    /// Warnings accumulated across all guardrail chains
    pub warnings: Vec<Verdict>,
    pub usage: TokenUsage,
    pub role_usage: BTreeMap<String, RoleUsage>,
}

impl CrewOutput {
    pub fn get(&self, task_id: &str) -> Option<&TaskArtifact> {
        self.outputs.get(task_id)
    }
}

struct TaskRun {
    artifact: TaskArtifact,
    warnings: Vec<Verdict>,
    usage: TokenUsage,
    /// Worker invocations consumed, including the successful one
    attempts: u32,
}

/// A bounded group of workers executing a task DAG under one policy
pub struct Crew {
    name: String,
    workers: HashMap<String, Arc<Worker>>,
    tasks: Vec<Task>,
    policy: ProcessPolicy,
    coordinator: Option<String>,
    /// Concurrent LLM invocations allowed in flight
    capacity: usize,
}

impl Crew {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: HashMap::new(),
            tasks: Vec::new(),
            policy: ProcessPolicy::Sequential,
            coordinator: None,
            capacity: 4,
        }
    }

    pub fn with_worker(mut self, worker: Worker) -> Self {
        self.workers
            .insert(worker.role_name().to_string(), Arc::new(worker));
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_policy(mut self, policy: ProcessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_coordinator(mut self, role: impl Into<String>) -> Self {
        self.coordinator = Some(role.into());
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    /// Execute all tasks and return the merged outputs plus warnings.
    ///
    /// Fails fast on the first critical guardrail verdict or exhausted
    /// retry budget, identifying the offending task.
    pub async fn kickoff(&self, ctx: &CrewContext, cancel: &CancelFlag) -> Result<CrewOutput> {
        let order = topological_order(&self.tasks)?;
        tracing::info!(
            crew = %self.name,
            tasks = self.tasks.len(),
            policy = ?self.policy,
            "crew kickoff"
        );
        match self.policy {
            ProcessPolicy::Sequential => self.run_sequential(order, ctx, cancel).await,
            ProcessPolicy::Coordinated {
                max_active_per_worker,
            } => {
                self.run_coordinated(order, max_active_per_worker, ctx, cancel)
                    .await
            }
        }
    }

    fn worker_for(&self, role: &str) -> Result<Arc<Worker>> {
        self.workers.get(role).cloned().ok_or_else(|| {
            Error::Config(format!(
                "crew '{}' has no worker for role '{role}'",
                self.name
            ))
        })
    }

    fn guard_ctx_for(&self, task: &Task, ctx: &CrewContext) -> GuardrailContext {
        let mut gctx = GuardrailContext::new(task.role.clone())
            .with_workspace_roots(ctx.workspace_roots.clone())
            .with_coverage_threshold(ctx.coverage_threshold)
            .with_quality_score_threshold(ctx.quality_score_threshold)
            .with_dependency_blocklist(ctx.dependency_blocklist.clone());
        if let Some(ref requirements) = ctx.requirements {
            gctx = gctx.with_requirements(requirements.clone());
        }
        if let Some(ref architecture) = ctx.architecture {
            gctx = gctx.with_architecture(architecture.clone());
        }
        gctx
    }

    fn memory_scope(&self, ctx: &CrewContext) -> String {
        format!("{}/{}", ctx.project_id, self.name)
    }

    fn rendered_deps(
        &self,
        task: &Task,
        outputs: &BTreeMap<String, TaskArtifact>,
    ) -> Vec<(String, String)> {
        task.depends_on
            .iter()
            .filter_map(|dep| {
                outputs
                    .get(dep)
                    .map(|artifact| (dep.clone(), artifact.render_for_context()))
            })
            .collect()
    }

    fn fold_success(output: &mut CrewOutput, task: &Task, model_id: &str, run: TaskRun) {
        output.usage.add(run.usage);
        output.warnings.extend(run.warnings);
        let role = output.role_usage.entry(task.role.clone()).or_default();
        role.model_id = model_id.to_string();
        role.invocations += run.attempts;
        role.failures += run.attempts.saturating_sub(1);
        role.usage.add(run.usage);
        output.outputs.insert(task.id.clone(), run.artifact);
    }

    async fn run_sequential(
        &self,
        order: Vec<usize>,
        ctx: &CrewContext,
        cancel: &CancelFlag,
    ) -> Result<CrewOutput> {
        let mut output = CrewOutput::default();
        let scope = self.memory_scope(ctx);

        for idx in order {
            cancel.check()?;
            let task = &self.tasks[idx];
            let worker = self.worker_for(&task.role)?;
            let model_id = worker.model_id().to_string();
            let deps = self.rendered_deps(task, &output.outputs);
            let run = run_task(
                worker,
                task.clone(),
                deps,
                ctx.extra_context.clone(),
                self.guard_ctx_for(task, ctx),
                Some(scope.clone()),
                cancel.clone(),
            )
            .await?;
            fold_task_log(&self.name, task, &run);
            Self::fold_success(&mut output, task, &model_id, run);
        }
        Ok(output)
    }

    async fn run_coordinated(
        &self,
        order: Vec<usize>,
        max_active_per_worker: usize,
        ctx: &CrewContext,
        cancel: &CancelFlag,
    ) -> Result<CrewOutput> {
        let coordinator = self.coordinator.clone().ok_or_else(|| {
            Error::Config(format!(
                "coordinated crew '{}' requires a coordinator role",
                self.name
            ))
        })?;
        let max_active = max_active_per_worker.max(1);

        // The coordinator assigns every task to its role-matched worker;
        // each assignment passes the delegation rules.
        for task in &self.tasks {
            let verdict = delegation_verdict(&coordinator, &task.role, &[coordinator.clone()]);
            if verdict.is_fail() {
                let critical = verdict.is_critical();
                return Err(Error::GuardrailBlocked {
                    task: task.id.clone(),
                    category: verdict.category,
                    message: verdict.message,
                    critical,
                });
            }
            self.worker_for(&task.role)?;
            tracing::info!(
                crew = %self.name,
                coordinator = %coordinator,
                task = %task.id,
                role = %task.role,
                "coordinator assignment"
            );
        }

        let semaphore = Arc::new(Semaphore::new(self.capacity));
        let scope = self.memory_scope(ctx);
        let mut remaining = order;
        let mut committed_ids: HashSet<String> = HashSet::new();
        let mut active_per_role: HashMap<String, usize> = HashMap::new();
        let mut join_set: JoinSet<(usize, Result<TaskRun>)> = JoinSet::new();
        let mut output = CrewOutput::default();

        loop {
            cancel.check().inspect_err(|_| join_set.abort_all())?;

            // Launch every ready task within the per-worker cap
            let mut i = 0;
            while i < remaining.len() {
                let idx = remaining[i];
                let task = &self.tasks[idx];
                let active = active_per_role.get(&task.role).copied().unwrap_or(0);
                if task.is_ready(&committed_ids) && active < max_active {
                    remaining.remove(i);
                    *active_per_role.entry(task.role.clone()).or_insert(0) += 1;

                    let worker = self.worker_for(&task.role)?;
                    let task_clone = task.clone();
                    let deps = self.rendered_deps(task, &output.outputs);
                    let seeds = ctx.extra_context.clone();
                    let gctx = self.guard_ctx_for(task, ctx);
                    let scope = scope.clone();
                    let cancel = cancel.clone();
                    let semaphore = semaphore.clone();
                    join_set.spawn(async move {
                        let result = async {
                            let _permit = semaphore
                                .acquire_owned()
                                .await
                                .map_err(|_| Error::Cancelled)?;
                            run_task(
                                worker,
                                task_clone,
                                deps,
                                seeds,
                                gctx,
                                Some(scope),
                                cancel,
                            )
                            .await
                        }
                        .await;
                        (idx, result)
                    });
                } else {
                    i += 1;
                }
            }

            if join_set.is_empty() {
                if remaining.is_empty() {
                    break;
                }
                return Err(Error::Invariant(format!(
                    "crew '{}' scheduler stalled with {} tasks unscheduled",
                    self.name,
                    remaining.len()
                )));
            }

            let joined = join_set
                .join_next()
                .await
                .expect("join set checked non-empty");
            let (idx, result) = joined
                .map_err(|e| Error::Invariant(format!("crew task panicked: {e}")))?;
            let task = &self.tasks[idx];
            if let Some(active) = active_per_role.get_mut(&task.role) {
                *active = active.saturating_sub(1);
            }
            match result {
                Ok(run) => {
                    fold_task_log(&self.name, task, &run);
                    committed_ids.insert(task.id.clone());
                    let model_id = self.worker_for(&task.role)?.model_id().to_string();
                    Self::fold_success(&mut output, task, &model_id, run);
                }
                Err(error) => {
                    join_set.abort_all();
                    return Err(error);
                }
            }
        }
        Ok(output)
    }
}

impl std::fmt::Debug for Crew {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crew")
            .field("name", &self.name)
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .field("tasks", &self.task_ids())
            .field("policy", &self.policy)
            .finish()
    }
}

fn fold_task_log(crew: &str, task: &Task, run: &TaskRun) {
    tracing::info!(
        crew,
        task = %task.id,
        attempts = run.attempts,
        warnings = run.warnings.len(),
        tokens = %run.usage,
        "task committed"
    );
}

/// Drive one task through the invoke → guardrail → retry loop.
///
/// Shape failures and soft guardrail failures feed the verdict back into
/// the next attempt until the task budget is exhausted. Timeouts surface as
/// transient failures.
async fn run_task(
    worker: Arc<Worker>,
    task: Task,
    deps: Vec<(String, String)>,
    seed_feedback: Vec<String>,
    base_gctx: GuardrailContext,
    memory_scope: Option<String>,
    cancel: CancelFlag,
) -> Result<TaskRun> {
    let mut feedback = seed_feedback;
    let mut usage = TokenUsage::default();
    let mut attempts = 0u32;

    loop {
        cancel.check()?;
        let attempt = attempts;
        let mut inv = InvocationContext::new(&task.id, &task.description, task.expected)
            .with_feedback(feedback.clone());
        for (dep_id, dep_output) in &deps {
            inv = inv.with_dependency(dep_id.clone(), dep_output.clone());
        }
        if let Some(ref scope) = memory_scope {
            inv = inv.with_memory_scope(scope.clone());
        }

        let invoked = tokio::time::timeout(task.timeout, worker.invoke(&inv, &cancel)).await;
        attempts += 1;
        let output = match invoked {
            Err(_elapsed) => {
                return Err(Error::Transient(format!(
                    "task '{}' timed out after {:?}",
                    task.id, task.timeout
                )));
            }
            Ok(Err(Error::Shape(diagnostic))) => {
                if attempt < task.max_retries {
                    tracing::warn!(task = %task.id, %diagnostic, "output shape retry");
                    feedback.push(format!(
                        "Your previous output could not be parsed: {diagnostic}"
                    ));
                    continue;
                }
                return Err(Error::BudgetExhausted {
                    scope: task.id.clone(),
                    attempts,
                });
            }
            Ok(Err(error)) => return Err(error),
            Ok(Ok(output)) => output,
        };
        usage.add(output.usage);

        let gctx = base_gctx
            .clone()
            .with_iteration(output.iterations, worker.max_iterations());
        match task
            .guardrails
            .evaluate(&output.artifact, &gctx, attempt < task.max_retries)
        {
            ChainOutcome::Committed { warnings } => {
                return Ok(TaskRun {
                    artifact: output.artifact,
                    warnings,
                    usage,
                    attempts,
                });
            }
            ChainOutcome::Retry { verdict, .. } => {
                tracing::warn!(task = %task.id, verdict = %verdict, "guardrail retry");
                feedback.push(format!("[{}] {}", verdict.category, verdict.message));
            }
            ChainOutcome::Rejected { verdict, .. } => {
                if verdict.is_critical() || !verdict.retry_allowed {
                    let critical = verdict.is_critical();
                    return Err(Error::GuardrailBlocked {
                        task: task.id.clone(),
                        category: verdict.category,
                        message: verdict.message,
                        critical,
                    });
                }
                return Err(Error::BudgetExhausted {
                    scope: task.id.clone(),
                    attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::{Guardrail, GuardrailChain};
    use crate::llm::{
        ChatRole, Completion, CompletionRequest, LlmClient, LlmError,
    };
    use crate::model::ArtifactKind;
    use crate::worker::{RoleProfile, WorkerConfig};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replies per task: scans the user message for "Task: <key>" and pops
    /// the next scripted response for that key.
    struct KeyedLlm {
        scripts: Mutex<HashMap<String, Vec<String>>>,
        requests: Mutex<Vec<CompletionRequest>>,
        delay: Duration,
    }

    impl KeyedLlm {
        fn new(scripts: &[(&str, &[&str])]) -> Self {
            let map = scripts
                .iter()
                .map(|(key, responses)| {
                    (
                        key.to_string(),
                        responses.iter().map(|r| r.to_string()).collect(),
                    )
                })
                .collect();
            Self {
                scripts: Mutex::new(map),
                requests: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for KeyedLlm {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<Completion, LlmError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.requests.lock().unwrap().push(request.clone());
            let user = request
                .messages
                .iter()
                .find(|m| m.role == ChatRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let mut scripts = self.scripts.lock().unwrap();
            for (key, responses) in scripts.iter_mut() {
                if user.contains(key.as_str()) {
                    if responses.is_empty() {
                        return Err(LlmError::Permanent(format!("script for '{key}' exhausted")));
                    }
                    return Ok(Completion::stop(responses.remove(0), TokenUsage::new(10, 5)));
                }
            }
            Err(LlmError::Permanent(format!("no script matches: {user}")))
        }
    }

    fn fast_worker(role: &str, llm: Arc<KeyedLlm>) -> Worker {
        Worker::new(RoleProfile::new(role), "medium", llm).with_config(WorkerConfig {
            backoff_base: Duration::from_millis(1),
            ..WorkerConfig::default()
        })
    }

    /// Guardrail that fails any artifact whose text contains "bad"
    struct RejectBad;

    impl Guardrail for RejectBad {
        fn name(&self) -> &'static str {
            "test.reject_bad"
        }
        fn check(&self, artifact: &TaskArtifact, _ctx: &GuardrailContext) -> Verdict {
            if artifact.scan_text().contains("bad") {
                Verdict::fail("test.reject_bad", "output contains 'bad'")
            } else {
                Verdict::pass("test.reject_bad")
            }
        }
    }

    struct CriticalAlways;

    impl Guardrail for CriticalAlways {
        fn name(&self) -> &'static str {
            "test.critical"
        }
        fn check(&self, _artifact: &TaskArtifact, _ctx: &GuardrailContext) -> Verdict {
            Verdict::critical("test.critical", "blocked")
        }
    }

    fn ctx() -> CrewContext {
        CrewContext::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_sequential_dependency_flow() {
        let llm = Arc::new(KeyedLlm::new(&[
            ("gather the requirements", &["requirements text"]),
            ("design from them", &["design text"]),
        ]));
        let crew = Crew::new("planning")
            .with_worker(fast_worker("product_owner", llm.clone()))
            .with_worker(fast_worker("architect", llm.clone()))
            .with_task(Task::new(
                "requirements",
                "gather the requirements",
                "product_owner",
                ArtifactKind::Text,
            ))
            .with_task(
                Task::new("design", "design from them", "architect", ArtifactKind::Text)
                    .with_dependencies(vec!["requirements".into()]),
            );

        let output = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap();
        assert_eq!(
            output.get("requirements"),
            Some(&TaskArtifact::Text("requirements text".into()))
        );
        assert_eq!(
            output.get("design"),
            Some(&TaskArtifact::Text("design text".into()))
        );

        // The dependent task saw its dependency's output
        let design_request = llm
            .requests()
            .into_iter()
            .find(|r| r.messages[1].content.contains("design from them"))
            .unwrap();
        assert!(design_request.messages[1]
            .content
            .contains("requirements text"));
    }

    #[tokio::test]
    async fn test_guardrail_retry_feeds_verdict_back() {
        let llm = Arc::new(KeyedLlm::new(&[(
            "write the module",
            &["bad first draft", "clean second draft"],
        )]));
        let crew = Crew::new("dev").with_worker(fast_worker("dev", llm.clone())).with_task(
            Task::new("module", "write the module", "dev", ArtifactKind::Text)
                .with_guardrails(GuardrailChain::new().with(RejectBad)),
        );

        let output = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap();
        assert_eq!(
            output.get("module"),
            Some(&TaskArtifact::Text("clean second draft".into()))
        );
        let role = output.role_usage.get("dev").unwrap();
        assert_eq!(role.invocations, 2);
        assert_eq!(role.failures, 1);

        // The retry prompt carried the verdict message
        let retry_request = llm.requests().into_iter().last().unwrap();
        assert!(retry_request.messages[1]
            .content
            .contains("output contains 'bad'"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_identifies_task() {
        let llm = Arc::new(KeyedLlm::new(&[(
            "write the module",
            &["bad", "bad", "bad", "bad"],
        )]));
        let crew = Crew::new("dev").with_worker(fast_worker("dev", llm)).with_task(
            Task::new("module", "write the module", "dev", ArtifactKind::Text)
                .with_guardrails(GuardrailChain::new().with(RejectBad))
                .with_max_retries(2),
        );

        let err = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap_err();
        match err {
            Error::BudgetExhausted { scope, attempts } => {
                assert_eq!(scope, "module");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_critical_verdict_fails_fast_without_commit() {
        let llm = Arc::new(KeyedLlm::new(&[("emit code", &["anything", "anything"])]));
        let crew = Crew::new("dev").with_worker(fast_worker("dev", llm)).with_task(
            Task::new("code", "emit code", "dev", ArtifactKind::Text)
                .with_guardrails(GuardrailChain::new().with(CriticalAlways))
                .with_max_retries(1),
        );

        let err = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap_err();
        match err {
            Error::GuardrailBlocked { task, critical, .. } => {
                assert_eq!(task, "code");
                assert!(critical);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_worker_is_config_error() {
        let crew = Crew::new("dev").with_task(Task::new(
            "orphan",
            "no one does this",
            "ghost_role",
            ArtifactKind::Text,
        ));
        let err = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_shape_retry_then_success() {
        let llm = Arc::new(KeyedLlm::new(&[(
            "report results",
            &[
                "this is not json",
                r#"{"total": 2, "passed": 2, "coverage": 0.9}"#,
            ],
        )]));
        let crew = Crew::new("qa").with_worker(fast_worker("qa_engineer", llm)).with_task(
            Task::new("report", "report results", "qa_engineer", ArtifactKind::TestReport),
        );

        let output = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap();
        let report = output.get("report").unwrap().as_test_report().unwrap();
        assert_eq!(report.passed, 2);
        let role = output.role_usage.get("qa_engineer").unwrap();
        assert_eq!(role.invocations, 2);
    }

    #[tokio::test]
    async fn test_task_timeout_is_transient() {
        let llm = Arc::new(
            KeyedLlm::new(&[("slow work", &["never arrives"])])
                .with_delay(Duration::from_millis(200)),
        );
        let crew = Crew::new("dev").with_worker(fast_worker("dev", llm)).with_task(
            Task::new("slow", "slow work", "dev", ArtifactKind::Text)
                .with_timeout(Duration::from_millis(20)),
        );

        let err = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
    }

    #[tokio::test]
    async fn test_coordinated_runs_independent_tasks() {
        let llm = Arc::new(KeyedLlm::new(&[
            ("backend part", &["backend done"]),
            ("devops part", &["devops done"]),
            ("review part", &["review done"]),
        ]));
        let crew = Crew::new("dev")
            .with_worker(fast_worker("backend_developer", llm.clone()))
            .with_worker(fast_worker("devops_engineer", llm.clone()))
            .with_coordinator("manager")
            .with_policy(ProcessPolicy::Coordinated {
                max_active_per_worker: 2,
            })
            .with_task(Task::new(
                "backend",
                "backend part",
                "backend_developer",
                ArtifactKind::Text,
            ))
            .with_task(Task::new(
                "devops",
                "devops part",
                "devops_engineer",
                ArtifactKind::Text,
            ))
            .with_task(
                Task::new("review", "review part", "backend_developer", ArtifactKind::Text)
                    .with_dependencies(vec!["backend".into(), "devops".into()]),
            );

        let output = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap();
        assert_eq!(output.outputs.len(), 3);

        // The dependent task observed both committed outputs
        let review_request = llm
            .requests()
            .into_iter()
            .find(|r| r.messages[1].content.contains("review part"))
            .unwrap();
        assert!(review_request.messages[1].content.contains("backend done"));
        assert!(review_request.messages[1].content.contains("devops done"));
    }

    #[tokio::test]
    async fn test_coordinated_requires_coordinator() {
        let llm = Arc::new(KeyedLlm::new(&[("x", &["y"])]));
        let crew = Crew::new("dev")
            .with_worker(fast_worker("dev", llm))
            .with_policy(ProcessPolicy::Coordinated {
                max_active_per_worker: 1,
            })
            .with_task(Task::new("t", "x", "dev", ArtifactKind::Text));
        let err = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_coordinated_rejects_non_delegator_coordinator() {
        let llm = Arc::new(KeyedLlm::new(&[("x", &["y"])]));
        let crew = Crew::new("dev")
            .with_worker(fast_worker("dev", llm))
            .with_coordinator("backend_developer")
            .with_policy(ProcessPolicy::Coordinated {
                max_active_per_worker: 1,
            })
            .with_task(Task::new("t", "x", "dev", ArtifactKind::Text));
        let err = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, Error::GuardrailBlocked { .. }));
    }

    #[tokio::test]
    async fn test_extra_context_reaches_every_task() {
        let llm = Arc::new(KeyedLlm::new(&[("fix the module", &["fixed"])]));
        let crew = Crew::new("dev").with_worker(fast_worker("dev", llm.clone())).with_task(
            Task::new("module", "fix the module", "dev", ArtifactKind::Text),
        );
        let context = ctx().with_extra_context(vec!["tests failed: test_items_post".into()]);
        crew.kickoff(&context, &CancelFlag::new()).await.unwrap();

        let request = llm.requests().into_iter().next().unwrap();
        assert!(request.messages[1]
            .content
            .contains("tests failed: test_items_post"));
    }

    #[tokio::test]
    async fn test_cycle_in_tasks_rejected_at_kickoff() {
        let llm = Arc::new(KeyedLlm::new(&[("x", &["y"])]));
        let crew = Crew::new("dev")
            .with_worker(fast_worker("dev", llm))
            .with_task(
                Task::new("a", "x", "dev", ArtifactKind::Text)
                    .with_dependencies(vec!["b".into()]),
            )
            .with_task(
                Task::new("b", "x", "dev", ArtifactKind::Text)
                    .with_dependencies(vec!["a".into()]),
            );
        let err = crew.kickoff(&ctx(), &CancelFlag::new()).await.unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }
}
