//! Standard crews for the delivery pipeline
//!
//! Builds the planning, development, testing, and deployment crews from the
//! run options: role-bound workers with resolved models, per-task guardrail
//! chains, and policies. Crews are rebuilt per phase run so task selection
//! can follow the current state (a development crew only includes frontend
//! work when the architecture declares a frontend component).

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cancel::CancelFlag;
use crate::config::RunOptions;
use crate::crew::{Crew, CrewContext, CrewOutput, ProcessPolicy, Task};
use crate::error::Result;
use crate::flow::{CrewRunner, PhaseCrews, PhaseInputs};
use crate::guardrail::behavioral::{
    IterationLimit, OutputShape, RequirementsCompleteness, RoleAdherence, ScopeControl,
};
use crate::guardrail::quality::{
    ArchitectureCompliance, DependencyPolicy, DocPresence, SourceQuality,
};
use crate::guardrail::security::{
    DangerousPatterns, PathSecurity, PiiDetection, SecretDetection,
};
use crate::guardrail::GuardrailChain;
use crate::llm::LlmClient;
use crate::memory::MemoryHandle;
use crate::model::ArtifactKind;
use crate::state::ProjectState;
use crate::tools::{ToolSet, WorkspaceFileStore};
use crate::worker::{RoleProfile, Worker};

/// Factory for the standard per-phase crews
pub struct StandardCrews {
    llm: Arc<dyn LlmClient>,
    options: RunOptions,
    memory: MemoryHandle,
    tools: ToolSet,
}

impl StandardCrews {
    pub fn new(llm: Arc<dyn LlmClient>, options: RunOptions) -> Self {
        Self {
            llm,
            options,
            memory: MemoryHandle::disabled(),
            tools: ToolSet::new(),
        }
    }

    pub fn with_memory(mut self, memory: MemoryHandle) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    /// Wire the four phase runners for the flow
    pub fn into_phase_crews(self) -> PhaseCrews {
        let shared = Arc::new(self);
        PhaseCrews {
            planning: Arc::new(PlanningPhase(shared.clone())),
            development: Arc::new(DevelopmentPhase(shared.clone())),
            testing: Arc::new(TestingPhase(shared.clone())),
            deployment: Arc::new(DeploymentPhase(shared)),
        }
    }

    fn worker(&self, tools: &ToolSet, role: &str, goal: &str, persona: &str) -> Result<Worker> {
        let model_id = self.options.model_for_role(role)?;
        Ok(Worker::new(
            RoleProfile::new(role).with_goal(goal).with_persona(persona),
            model_id,
            self.llm.clone(),
        )
        .with_memory(self.memory.clone())
        .with_tools(tools.clone()))
    }

    /// Tool subset for this run's workers.
    ///
    /// Unless a file store was injected explicitly, workers get the
    /// workspace file store rooted at the run's workspace, so every file
    /// operation passes the root whitelist, symlink checks, size cap, and
    /// audit log.
    fn tools_for(&self, state: &ProjectState) -> ToolSet {
        if self.tools.file_store.is_some() {
            return self.tools.clone();
        }
        let store = WorkspaceFileStore::new(self.workspace_roots(state));
        self.tools.clone().with_file_store(Arc::new(store))
    }

    fn workspace_roots(&self, state: &ProjectState) -> Vec<PathBuf> {
        let mut roots = vec![self
            .options
            .persist_dir
            .join(state.project_id.to_string())
            .join("workspace")];
        roots.extend(self.options.workspace_roots.clone());
        roots
    }

    fn crew_context(&self, state: &ProjectState, inputs: &PhaseInputs) -> CrewContext {
        let mut ctx = CrewContext::new(state.project_id)
            .with_extra_context(inputs.extra_context.clone())
            .with_workspace_roots(self.workspace_roots(state))
            .with_coverage_threshold(self.options.coverage_threshold)
            .with_quality_score_threshold(self.options.quality_score_threshold)
            .with_dependency_blocklist(self.options.dependency_blocklist.clone());
        if let Some(ref requirements) = state.requirements {
            ctx = ctx.with_requirements(requirements.clone());
        }
        if let Some(ref architecture) = state.architecture {
            ctx = ctx.with_architecture(architecture.clone());
        }
        ctx
    }

    fn security_guards(&self) -> (DangerousPatterns, SecretDetection, PiiDetection, PathSecurity) {
        (
            DangerousPatterns::new().with_extra_patterns(&self.options.dangerous_patterns),
            SecretDetection::new(),
            PiiDetection::new(),
            PathSecurity::new(),
        )
    }

    /// Guardrail chain for tasks that emit source files
    fn code_chain(&self) -> GuardrailChain {
        let (dangerous, secrets, pii, paths) = self.security_guards();
        GuardrailChain::new()
            .with(OutputShape::new(ArtifactKind::CodeFiles))
            .with(RoleAdherence::new())
            .with(dangerous)
            .with(secrets)
            .with(pii)
            .with(paths)
            .with(SourceQuality::new())
            .with(DocPresence::new())
            .with(DependencyPolicy::new())
            .with(ArchitectureCompliance::new())
            .with(ScopeControl::new())
            .with(IterationLimit::new())
    }

    // -- Planning ----------------------------------------------------------

    fn planning_crew(&self, state: &ProjectState) -> Result<Crew> {
        let tools = self.tools_for(state);
        let product_owner = self.worker(
            &tools,
            "product_owner",
            "turn the stakeholder request into testable requirements",
            "You write user stories with acceptance criteria and MoSCoW priorities, \
             and you report a confidence score honestly.",
        )?;
        let architect = self.worker(
            &tools,
            "architect",
            "design a pragmatic architecture for the requirements",
            "You pick boring, justified technology and keep component boundaries crisp.",
        )?;

        let requirements_task = Task::new(
            "requirements",
            format!(
                "Analyze this project request and produce a requirements document:\n\n{}",
                state.description
            ),
            "product_owner",
            ArtifactKind::Requirements,
        )
        .with_guardrails(
            GuardrailChain::new()
                .with(OutputShape::new(ArtifactKind::Requirements))
                .with(RequirementsCompleteness::new())
                .with(RoleAdherence::new()),
        );

        let architecture_task = Task::new(
            "architecture",
            "Design the system architecture for the requirements produced above: \
             components with responsibilities, technology choices with justification, \
             interface contracts, data entities, deployment topology, and decision records.",
            "architect",
            ArtifactKind::Architecture,
        )
        .with_dependencies(vec!["requirements".to_string()])
        .with_guardrails(
            GuardrailChain::new()
                .with(OutputShape::new(ArtifactKind::Architecture))
                .with(RoleAdherence::new()),
        );

        Ok(Crew::new("planning")
            .with_worker(product_owner)
            .with_worker(architect)
            .with_task(requirements_task)
            .with_task(architecture_task)
            .with_capacity(self.options.llm_capacity))
    }

    // -- Development -------------------------------------------------------

    fn development_crew(&self, state: &ProjectState) -> Result<Crew> {
        let requirements_digest = state
            .requirements
            .as_ref()
            .map(|r| serde_json::to_string_pretty(r).unwrap_or_default())
            .unwrap_or_default();
        let architecture_digest = state
            .architecture
            .as_ref()
            .map(|a| serde_json::to_string_pretty(a).unwrap_or_default())
            .unwrap_or_default();
        let context_block = format!(
            "Requirements:\n{requirements_digest}\n\nArchitecture:\n{architecture_digest}"
        );
        let tools = self.tools_for(state);

        let mut crew = Crew::new("development")
            .with_coordinator("manager")
            .with_policy(ProcessPolicy::Coordinated {
                max_active_per_worker: 2,
            })
            .with_capacity(self.options.llm_capacity)
            .with_worker(self.worker(
                &tools,
                "backend_developer",
                "implement the server-side components and their tests' fixtures",
                "You write small typed functions with docstrings and never touch UI code.",
            )?)
            .with_worker(self.worker(
                &tools,
                "devops_engineer",
                "produce dependency manifests and operational configuration",
                "You pin versions exactly and keep configuration minimal.",
            )?)
            .with_task(
                Task::new(
                    "backend",
                    format!(
                        "Implement the backend source files for this system. \
                         Place files under module directories matching the architecture \
                         components.\n\n{context_block}"
                    ),
                    "backend_developer",
                    ArtifactKind::CodeFiles,
                )
                .with_guardrails(self.code_chain()),
            )
            .with_task(
                Task::new(
                    "devops",
                    format!(
                        "Produce the dependency manifest and any service configuration \
                         files this system needs.\n\n{context_block}"
                    ),
                    "devops_engineer",
                    ArtifactKind::CodeFiles,
                )
                .with_guardrails(self.code_chain()),
            );

        // Frontend work only exists when the architecture declares it
        let wants_frontend = state
            .architecture
            .as_ref()
            .map(|a| a.declares_frontend())
            .unwrap_or(false);
        if wants_frontend {
            crew = crew
                .with_worker(self.worker(
                    &tools,
                    "frontend_developer",
                    "implement the user-facing components",
                    "You build accessible interfaces and never write database code.",
                )?)
                .with_task(
                    Task::new(
                        "frontend",
                        format!(
                            "Implement the frontend files declared by the architecture.\n\n\
                             {context_block}"
                        ),
                        "frontend_developer",
                        ArtifactKind::CodeFiles,
                    )
                    .with_guardrails(self.code_chain()),
                );
        }
        Ok(crew)
    }

    // -- Testing -----------------------------------------------------------

    fn testing_crew(&self, state: &ProjectState) -> Result<Crew> {
        let tools = self.tools_for(state);
        let qa = self.worker(
            &tools,
            "qa_engineer",
            "prove the implementation against its acceptance criteria",
            "You write focused tests, run them, and report coverage without spin.",
        )?;
        let sources = state
            .files
            .iter()
            .map(|f| format!("--- {} ({})\n{}", f.path, f.language, f.content))
            .collect::<Vec<_>>()
            .join("\n");
        let (dangerous, secrets, _, paths) = self.security_guards();

        Ok(Crew::new("testing")
            .with_worker(qa)
            .with_capacity(self.options.llm_capacity)
            .with_task(
                Task::new(
                    "generate_tests",
                    format!(
                        "Write test files covering the acceptance criteria for these \
                         sources:\n\n{sources}"
                    ),
                    "qa_engineer",
                    ArtifactKind::CodeFiles,
                )
                .with_guardrails(
                    GuardrailChain::new()
                        .with(OutputShape::new(ArtifactKind::CodeFiles))
                        .with(RoleAdherence::new())
                        .with(dangerous)
                        .with(secrets)
                        .with(paths),
                ),
            )
            .with_task(
                Task::new(
                    "execute_tests",
                    "Execute the generated test suite against the sources (use the \
                     run_tests tool when available) and report totals, per-file \
                     coverage, failing cases, and traces.",
                    "qa_engineer",
                    ArtifactKind::TestReport,
                )
                .with_dependencies(vec!["generate_tests".to_string()])
                .with_guardrails(
                    GuardrailChain::new().with(OutputShape::new(ArtifactKind::TestReport)),
                ),
            )
            .with_task(
                Task::new(
                    "review",
                    "Review the code against the test results. List concrete fixes for \
                     any failing or uncovered behavior, one per line.",
                    "qa_engineer",
                    ArtifactKind::Text,
                )
                .with_dependencies(vec!["execute_tests".to_string()]),
            ))
    }

    // -- Deployment --------------------------------------------------------

    fn deployment_crew(&self, state: &ProjectState) -> Result<Crew> {
        let tools = self.tools_for(state);
        let devops = self.worker(
            &tools,
            "devops_engineer",
            "package the system and document how to run it",
            "You produce reproducible builds and runbooks a stranger could follow.",
        )?;
        let (dangerous, secrets, _, _) = self.security_guards();

        Ok(Crew::new("deployment")
            .with_worker(devops)
            .with_capacity(self.options.llm_capacity)
            .with_task(Task::new(
                "infrastructure",
                "Describe the infrastructure this system needs to run: processes, \
                 ports, storage, and scaling assumptions.",
                "devops_engineer",
                ArtifactKind::Text,
            ))
            .with_task(
                Task::new(
                    "packaging",
                    "Produce the deployment bundle: container build file, service \
                     composition file, CI pipeline configuration, and required \
                     environment variables.",
                    "devops_engineer",
                    ArtifactKind::Deployment,
                )
                .with_dependencies(vec!["infrastructure".to_string()])
                .with_guardrails(
                    GuardrailChain::new()
                        .with(OutputShape::new(ArtifactKind::Deployment))
                        .with(dangerous)
                        .with(secrets),
                ),
            )
            .with_task(
                Task::new(
                    "documentation",
                    "Write the operational runbook: how to build, run, verify, and \
                     roll back this deployment.",
                    "devops_engineer",
                    ArtifactKind::Text,
                )
                .with_dependencies(vec!["packaging".to_string()]),
            ))
    }
}

impl std::fmt::Debug for StandardCrews {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardCrews")
            .field("memory_enabled", &self.memory.is_enabled())
            .finish()
    }
}

struct PlanningPhase(Arc<StandardCrews>);
struct DevelopmentPhase(Arc<StandardCrews>);
struct TestingPhase(Arc<StandardCrews>);
struct DeploymentPhase(Arc<StandardCrews>);

#[async_trait]
impl CrewRunner for PlanningPhase {
    async fn run(
        &self,
        state: &ProjectState,
        inputs: &PhaseInputs,
        cancel: &CancelFlag,
    ) -> Result<CrewOutput> {
        let crew = self.0.planning_crew(state)?;
        crew.kickoff(&self.0.crew_context(state, inputs), cancel).await
    }
}

#[async_trait]
impl CrewRunner for DevelopmentPhase {
    async fn run(
        &self,
        state: &ProjectState,
        inputs: &PhaseInputs,
        cancel: &CancelFlag,
    ) -> Result<CrewOutput> {
        let crew = self.0.development_crew(state)?;
        crew.kickoff(&self.0.crew_context(state, inputs), cancel).await
    }
}

#[async_trait]
impl CrewRunner for TestingPhase {
    async fn run(
        &self,
        state: &ProjectState,
        inputs: &PhaseInputs,
        cancel: &CancelFlag,
    ) -> Result<CrewOutput> {
        let crew = self.0.testing_crew(state)?;
        crew.kickoff(&self.0.crew_context(state, inputs), cancel).await
    }
}

#[async_trait]
impl CrewRunner for DeploymentPhase {
    async fn run(
        &self,
        state: &ProjectState,
        inputs: &PhaseInputs,
        cancel: &CancelFlag,
    ) -> Result<CrewOutput> {
        let crew = self.0.deployment_crew(state)?;
        crew.kickoff(&self.0.crew_context(state, inputs), cancel).await
    }
}
