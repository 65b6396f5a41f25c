//! Project state: the single authoritative record for one run
//!
//! The flow exclusively owns a `ProjectState`; workers and guardrails only
//! see read-only snapshots. Every mutator enforces the state-machine edges,
//! retry bounds, and file-path rules, so an invalid mutation is a programmer
//! error surfaced immediately rather than a corrupted run.

pub mod persist;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Architecture, CodeFile, DeploymentBundle, Requirements, TestRun};

pub use persist::{FailureReport, StateStore};

/// Phases of the delivery lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Intake,
    Planning,
    Development,
    Testing,
    Deployment,
    AwaitingHuman,
    Complete,
    Error,
}

impl Phase {
    /// All phases, in canonical order
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Intake,
            Phase::Planning,
            Phase::Development,
            Phase::Testing,
            Phase::Deployment,
            Phase::AwaitingHuman,
            Phase::Complete,
            Phase::Error,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Intake => "intake",
            Phase::Planning => "planning",
            Phase::Development => "development",
            Phase::Testing => "testing",
            Phase::Deployment => "deployment",
            Phase::AwaitingHuman => "awaiting_human",
            Phase::Complete => "complete",
            Phase::Error => "error",
        }
    }

    /// Terminal phases end the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }

    /// Phases where budget exhaustion escalates to a human instead of ERROR
    pub fn supports_escalation(&self) -> bool {
        matches!(self, Phase::Intake | Phase::Planning | Phase::Testing)
    }

    /// Check a transition against the state-machine edges.
    ///
    /// `suspended_from` is consulted only when leaving `AwaitingHuman`: the
    /// run may resume solely into the phase it was suspended from.
    pub fn can_transition_to(&self, to: Phase, suspended_from: Option<Phase>) -> bool {
        use Phase::*;
        match (self, to) {
            (Intake, Planning) | (Intake, AwaitingHuman) | (Intake, Error) => true,
            (Planning, Development) | (Planning, AwaitingHuman) | (Planning, Error) => true,
            (Development, Testing) | (Development, Error) => true,
            (Testing, Deployment)
            | (Testing, Development)
            | (Testing, AwaitingHuman)
            | (Testing, Error) => true,
            (Deployment, Complete) | (Deployment, Error) => true,
            (AwaitingHuman, target) => suspended_from == Some(target),
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "intake" => Ok(Phase::Intake),
            "planning" => Ok(Phase::Planning),
            "development" => Ok(Phase::Development),
            "testing" => Ok(Phase::Testing),
            "deployment" => Ok(Phase::Deployment),
            "awaiting_human" => Ok(Phase::AwaitingHuman),
            "complete" => Ok(Phase::Complete),
            "error" => Ok(Phase::Error),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

/// Record of a single phase transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

/// Record of an error during the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub phase: Phase,
    /// Error category or code
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_recoverable")]
    pub recoverable: bool,
}

fn default_recoverable() -> bool {
    true
}

/// The authoritative state of one delivery run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub project_id: Uuid,
    pub description: String,
    pub phase: Phase,
    /// Phase the run was in when it entered `AwaitingHuman`
    #[serde(default)]
    pub suspended_from: Option<Phase>,
    #[serde(default)]
    pub requirements: Option<Requirements>,
    #[serde(default)]
    pub architecture: Option<Architecture>,
    #[serde(default)]
    pub files: Vec<CodeFile>,
    #[serde(default)]
    pub test_results: Option<TestRun>,
    #[serde(default)]
    pub deployment: Option<DeploymentBundle>,
    #[serde(default)]
    pub transitions: Vec<PhaseTransition>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    /// Per-phase retry counts, keyed by phase name
    #[serde(default)]
    pub retries: BTreeMap<String, u32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Unknown snapshot fields, preserved for forward compatibility
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_retries() -> u32 {
    3
}

impl ProjectState {
    /// Create a fresh state in the intake phase
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            project_id: Uuid::new_v4(),
            description: description.into(),
            phase: Phase::Intake,
            suspended_from: None,
            requirements: None,
            architecture: None,
            files: Vec::new(),
            test_results: None,
            deployment: None,
            transitions: Vec::new(),
            errors: Vec::new(),
            retries: BTreeMap::new(),
            max_retries: default_max_retries(),
            started_at: Utc::now(),
            completed_at: None,
            metadata: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Move to a new phase, recording the transition.
    ///
    /// Rejects edges outside the state machine. Entering `AwaitingHuman`
    /// records the suspension origin; leaving it clears the origin. Entering
    /// a terminal phase stamps `completed_at`.
    pub fn transition_to(&mut self, to: Phase, reason: impl Into<String>) -> Result<()> {
        let from = self.phase;
        if !from.can_transition_to(to, self.suspended_from) {
            return Err(Error::InvalidTransition { from, to });
        }

        let reason = reason.into();
        tracing::info!(
            project_id = %self.project_id,
            from = %from,
            to = %to,
            reason = %reason,
            "phase transition"
        );

        self.transitions.push(PhaseTransition {
            from,
            to,
            timestamp: self.monotonic_now(),
            reason,
        });

        if to == Phase::AwaitingHuman {
            self.suspended_from = Some(from);
        } else if from == Phase::AwaitingHuman {
            self.suspended_from = None;
        }

        self.phase = to;
        if to.is_terminal() {
            self.completed_at = Some(self.monotonic_now());
        }
        Ok(())
    }

    /// Record an error against the given phase
    pub fn record_error(
        &mut self,
        phase: Phase,
        kind: impl Into<String>,
        message: impl Into<String>,
        recoverable: bool,
    ) {
        let kind = kind.into();
        let message = message.into();
        tracing::warn!(
            project_id = %self.project_id,
            phase = %phase,
            kind = %kind,
            recoverable,
            "run error recorded"
        );
        self.errors.push(ErrorRecord {
            phase,
            kind,
            message,
            timestamp: self.monotonic_now(),
            recoverable,
        });
    }

    /// Append a generated file, enforcing path uniqueness and path safety
    pub fn add_file(&mut self, file: CodeFile) -> Result<()> {
        validate_relative_path(&file.path)?;
        if self.files.iter().any(|f| f.path == file.path) {
            return Err(Error::Invariant(format!(
                "duplicate file path: {}",
                file.path
            )));
        }
        self.files.push(file);
        Ok(())
    }

    /// Append many files; the state is unchanged if any path is invalid
    pub fn add_files(&mut self, files: Vec<CodeFile>) -> Result<()> {
        for file in &files {
            validate_relative_path(&file.path)?;
            if self.files.iter().any(|f| f.path == file.path)
                || files.iter().filter(|g| g.path == file.path).count() > 1
            {
                return Err(Error::Invariant(format!(
                    "duplicate file path: {}",
                    file.path
                )));
            }
        }
        self.files.extend(files);
        Ok(())
    }

    /// Add files, replacing any existing entry with the same path.
    ///
    /// Development re-runs regenerate files; the latest committed content
    /// wins while path uniqueness is preserved.
    pub fn upsert_files(&mut self, files: Vec<CodeFile>) -> Result<()> {
        for file in &files {
            validate_relative_path(&file.path)?;
        }
        for file in files {
            if let Some(existing) = self.files.iter_mut().find(|f| f.path == file.path) {
                *existing = file;
            } else {
                self.files.push(file);
            }
        }
        Ok(())
    }

    /// Retry count for a phase
    pub fn retry_count(&self, phase: Phase) -> u32 {
        self.retries.get(phase.name()).copied().unwrap_or(0)
    }

    /// Whether the phase has retry budget left
    pub fn can_retry(&self, phase: Phase) -> bool {
        self.retry_count(phase) < self.max_retries
    }

    /// Increment the retry count for a phase; fails once the budget is spent
    pub fn increment_retry(&mut self, phase: Phase) -> Result<()> {
        let current = self.retry_count(phase);
        if current >= self.max_retries {
            return Err(Error::BudgetExhausted {
                scope: phase.name().to_string(),
                attempts: current,
            });
        }
        self.retries.insert(phase.name().to_string(), current + 1);
        Ok(())
    }

    /// Elapsed wall-clock time for the run so far (or to completion)
    pub fn duration(&self) -> chrono::Duration {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        end - self.started_at
    }

    /// One-line human-readable status
    pub fn summary(&self) -> String {
        let mut parts = vec![
            format!("project {}", short_id(&self.project_id)),
            format!("phase: {}", self.phase),
            format!("files: {}", self.files.len()),
        ];
        if !self.errors.is_empty() {
            parts.push(format!("errors: {}", self.errors.len()));
        }
        if let Some(ref results) = self.test_results {
            parts.push(format!("tests: {}/{} passed", results.passed, results.total));
        }
        parts.join(" | ")
    }

    /// A timestamp that never moves backwards relative to recorded history
    fn monotonic_now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let last = self
            .transitions
            .last()
            .map(|t| t.timestamp)
            .into_iter()
            .chain(self.errors.last().map(|e| e.timestamp))
            .max();
        match last {
            Some(prev) if now < prev => prev,
            _ => now,
        }
    }
}

/// Validate a workspace-relative file path: non-empty, relative, no parent
/// traversal, no null bytes.
pub fn validate_relative_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::Invariant("empty file path".to_string()));
    }
    if path.contains('\0') {
        return Err(Error::Invariant(format!(
            "file path contains null byte: {path:?}"
        )));
    }
    let p = std::path::Path::new(path);
    if p.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err(Error::Invariant(format!("absolute file path: {path}")));
    }
    if p.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::Invariant(format!(
            "file path escapes workspace: {path}"
        )));
    }
    Ok(())
}

fn short_id(id: &Uuid) -> String {
    let text = id.to_string();
    text.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_in_intake() {
        let state = ProjectState::new("build a thing");
        assert_eq!(state.phase, Phase::Intake);
        assert!(state.transitions.is_empty());
        assert!(state.completed_at.is_none());
    }

    #[test]
    fn test_valid_forward_transitions() {
        let mut state = ProjectState::new("task");
        state.transition_to(Phase::Planning, "validated").unwrap();
        state.transition_to(Phase::Development, "planned").unwrap();
        state.transition_to(Phase::Testing, "coded").unwrap();
        state.transition_to(Phase::Deployment, "green").unwrap();
        state.transition_to(Phase::Complete, "shipped").unwrap();
        assert_eq!(state.phase, Phase::Complete);
        assert_eq!(state.transitions.len(), 5);
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut state = ProjectState::new("task");
        let err = state.transition_to(Phase::Deployment, "skip").unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(state.phase, Phase::Intake);
        assert!(state.transitions.is_empty());
    }

    #[test]
    fn test_testing_can_route_back_to_development() {
        let mut state = ProjectState::new("task");
        state.transition_to(Phase::Planning, "").unwrap();
        state.transition_to(Phase::Development, "").unwrap();
        state.transition_to(Phase::Testing, "").unwrap();
        state
            .transition_to(Phase::Development, "tests failed")
            .unwrap();
        assert_eq!(state.phase, Phase::Development);
    }

    #[test]
    fn test_awaiting_human_resumes_to_origin_only() {
        let mut state = ProjectState::new("task");
        state.transition_to(Phase::Planning, "").unwrap();
        state
            .transition_to(Phase::AwaitingHuman, "ambiguous")
            .unwrap();
        assert_eq!(state.suspended_from, Some(Phase::Planning));

        let err = state.transition_to(Phase::Development, "resume").unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        state.transition_to(Phase::Planning, "resumed").unwrap();
        assert_eq!(state.phase, Phase::Planning);
        assert!(state.suspended_from.is_none());
    }

    #[test]
    fn test_abort_resumes_then_errors() {
        // An abort response resumes to the suspended phase and errors from
        // there, keeping every recorded edge inside the state machine.
        let mut state = ProjectState::new("task");
        state.transition_to(Phase::Planning, "").unwrap();
        state.transition_to(Phase::AwaitingHuman, "").unwrap();
        assert!(matches!(
            state.transition_to(Phase::Error, "aborted"),
            Err(Error::InvalidTransition { .. })
        ));
        state.transition_to(Phase::Planning, "resumed").unwrap();
        state.transition_to(Phase::Error, "aborted").unwrap();
        assert_eq!(state.phase, Phase::Error);
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn test_transitions_are_time_ordered() {
        let mut state = ProjectState::new("task");
        state.transition_to(Phase::Planning, "").unwrap();
        state.transition_to(Phase::Development, "").unwrap();
        state.transition_to(Phase::Testing, "").unwrap();
        for pair in state.transitions.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_retry_budget_enforced() {
        let mut state = ProjectState::new("task").with_max_retries(2);
        state.increment_retry(Phase::Testing).unwrap();
        state.increment_retry(Phase::Testing).unwrap();
        assert!(!state.can_retry(Phase::Testing));
        let err = state.increment_retry(Phase::Testing).unwrap_err();
        assert!(matches!(err, Error::BudgetExhausted { .. }));
        assert_eq!(state.retry_count(Phase::Testing), 2);
    }

    #[test]
    fn test_duplicate_file_path_rejected() {
        let mut state = ProjectState::new("task");
        state
            .add_file(CodeFile::new("src/main.py", "a = 1", "python"))
            .unwrap();
        let err = state
            .add_file(CodeFile::new("src/main.py", "b = 2", "python"))
            .unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        assert_eq!(state.files.len(), 1);
    }

    #[test]
    fn test_traversal_and_absolute_paths_rejected() {
        let mut state = ProjectState::new("task");
        assert!(state
            .add_file(CodeFile::new("../escape.py", "x", "python"))
            .is_err());
        assert!(state
            .add_file(CodeFile::new("/etc/passwd", "x", "text"))
            .is_err());
        assert!(state
            .add_file(CodeFile::new("nested/../../out.py", "x", "python"))
            .is_err());
        assert!(state.files.is_empty());
    }

    #[test]
    fn test_upsert_replaces_existing_path() {
        let mut state = ProjectState::new("task");
        state
            .add_file(CodeFile::new("src/app.py", "v1", "python"))
            .unwrap();
        state
            .upsert_files(vec![
                CodeFile::new("src/app.py", "v2", "python"),
                CodeFile::new("src/new.py", "n", "python"),
            ])
            .unwrap();
        assert_eq!(state.files.len(), 2);
        assert_eq!(state.files[0].content, "v2");
    }

    #[test]
    fn test_add_files_is_atomic() {
        let mut state = ProjectState::new("task");
        let err = state.add_files(vec![
            CodeFile::new("src/ok.py", "x", "python"),
            CodeFile::new("src/ok.py", "y", "python"),
        ]);
        assert!(err.is_err());
        assert!(state.files.is_empty());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut state = ProjectState::new("roundtrip me");
        state.transition_to(Phase::Planning, "go").unwrap();
        state.record_error(Phase::Planning, "shape", "bad json", true);
        state
            .add_file(CodeFile::new("src/app.py", "app = 1", "python"))
            .unwrap();
        state.increment_retry(Phase::Planning).unwrap();

        let json = serde_json::to_string(&state).unwrap();
        let parsed: ProjectState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_unknown_snapshot_fields_are_preserved() {
        let state = ProjectState::new("task");
        let mut value = serde_json::to_value(&state).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("future_field".into(), serde_json::json!({"nested": 42}));

        let parsed: ProjectState = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(
            parsed.extra.get("future_field"),
            Some(&serde_json::json!({"nested": 42}))
        );

        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(
            reserialized.get("future_field"),
            Some(&serde_json::json!({"nested": 42}))
        );
    }

    #[test]
    fn test_summary_mentions_phase_and_tests() {
        let mut state = ProjectState::new("task");
        state.test_results = Some(TestRun {
            total: 4,
            passed: 4,
            ..TestRun::default()
        });
        let text = state.summary();
        assert!(text.contains("intake"));
        assert!(text.contains("4/4"));
    }

    #[test]
    fn test_escalation_support_by_phase() {
        assert!(Phase::Testing.supports_escalation());
        assert!(Phase::Planning.supports_escalation());
        assert!(Phase::Intake.supports_escalation());
        assert!(!Phase::Development.supports_escalation());
        assert!(!Phase::Deployment.supports_escalation());
    }
}
