//! Guardrails: pure validators over task outputs
//!
//! A guardrail inspects a typed artifact plus context and returns a verdict.
//! Verdicts drive the retry loop: warnings accumulate, soft failures
//! re-invoke the worker with feedback, and critical failures reject the task
//! outright so the output is never committed.

pub mod behavioral;
pub mod quality;
pub mod security;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::model::{Architecture, Requirements, TaskArtifact};

/// Outcome class of a single guardrail check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Warn,
    Fail,
}

/// How serious a failed check is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

/// Result of one guardrail check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: Status,
    /// Machine-readable category (e.g. `security.secrets`)
    pub category: String,
    /// Human-readable message, also used as retry feedback
    pub message: String,
    /// Structured detail bag (matched patterns, redacted text, ...)
    #[serde(default)]
    pub details: serde_json::Value,
    /// Whether the task may be re-invoked after this verdict
    #[serde(default = "default_retry_allowed")]
    pub retry_allowed: bool,
    #[serde(default)]
    pub severity: Severity,
}

fn default_retry_allowed() -> bool {
    true
}

impl Verdict {
    pub fn pass(category: impl Into<String>) -> Self {
        Self {
            status: Status::Pass,
            category: category.into(),
            message: String::new(),
            details: serde_json::Value::Null,
            retry_allowed: true,
            severity: Severity::Info,
        }
    }

    pub fn warn(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Status::Warn,
            category: category.into(),
            message: message.into(),
            details: serde_json::Value::Null,
            retry_allowed: true,
            severity: Severity::Warning,
        }
    }

    pub fn fail(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Status::Fail,
            category: category.into(),
            message: message.into(),
            details: serde_json::Value::Null,
            retry_allowed: true,
            severity: Severity::Warning,
        }
    }

    /// A critical failure: rejects the output regardless of warn aggregation
    pub fn critical(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Critical,
            ..Self::fail(category, message)
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retry_allowed = false;
        self
    }

    /// Output is allowed through (pass or warn)
    pub fn is_ok(&self) -> bool {
        matches!(self.status, Status::Pass | Status::Warn)
    }

    pub fn is_fail(&self) -> bool {
        self.status == Status::Fail
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical && self.is_fail()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}: {}", self.category, self.status, self.message)
    }
}

/// Read-only context a guardrail check runs against
#[derive(Debug, Clone, Default)]
pub struct GuardrailContext {
    /// Role of the worker that produced the output
    pub role: String,
    pub requirements: Option<Requirements>,
    pub architecture: Option<Architecture>,
    /// Worker-loop iteration the output came from
    pub iteration: u32,
    /// Worker-loop iteration cap
    pub max_iterations: u32,
    /// Whitelisted workspace roots for path checks
    pub workspace_roots: Vec<PathBuf>,
    /// Minimum acceptable coverage ratio for test outputs
    pub coverage_threshold: f64,
    /// Minimum acceptable source quality score (0..=10)
    pub quality_score_threshold: f64,
    /// Package names that must not appear in dependency manifests
    pub dependency_blocklist: Vec<String>,
}

impl GuardrailContext {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            max_iterations: 8,
            coverage_threshold: 0.8,
            quality_score_threshold: 7.0,
            ..Self::default()
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

    pub fn with_iteration(mut self, iteration: u32, max_iterations: u32) -> Self {
        self.iteration = iteration;
        self.max_iterations = max_iterations;
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

/// A pure validator over `(artifact, context)`
pub trait Guardrail: Send + Sync {
    /// Stable name used in logs and verdict categories
    fn name(&self) -> &'static str;

    /// Run the check
    fn check(&self, artifact: &TaskArtifact, ctx: &GuardrailContext) -> Verdict;
}

/// Result of evaluating a chain against one attempt
#[derive(Debug, Clone)]
pub enum ChainOutcome {
    /// All checks allowed the output; warnings are attached
    Committed { warnings: Vec<Verdict> },
    /// A failing check wants the worker re-invoked with its message
    Retry {
        verdict: Verdict,
        warnings: Vec<Verdict>,
    },
    /// The output is rejected with no retry path
    Rejected {
        verdict: Verdict,
        warnings: Vec<Verdict>,
    },
}

/// An ordered chain of guardrails attached to a task
#[derive(Clone, Default)]
pub struct GuardrailChain {
    guards: Vec<Arc<dyn Guardrail>>,
}

impl GuardrailChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, guard: impl Guardrail + 'static) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    pub fn push(&mut self, guard: Arc<dyn Guardrail>) {
        self.guards.push(guard);
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Evaluate the chain in declared order.
    ///
    /// Pass and warn continue (warnings accumulate). The first failure
    /// short-circuits: if retry is allowed and budget remains the outcome is
    /// `Retry`, otherwise `Rejected`. A critical failure never degrades into
    /// a warning; it retries only while budget remains.
    pub fn evaluate(
        &self,
        artifact: &TaskArtifact,
        ctx: &GuardrailContext,
        budget_remaining: bool,
    ) -> ChainOutcome {
        let mut warnings = Vec::new();
        for guard in &self.guards {
            let verdict = guard.check(artifact, ctx);
            tracing::debug!(
                guard = guard.name(),
                status = ?verdict.status,
                severity = ?verdict.severity,
                "guardrail checked"
            );
            match verdict.status {
                Status::Pass => {}
                Status::Warn => warnings.push(verdict),
                Status::Fail => {
                    if verdict.retry_allowed && budget_remaining {
                        return ChainOutcome::Retry { verdict, warnings };
                    }
                    return ChainOutcome::Rejected { verdict, warnings };
                }
            }
        }
        ChainOutcome::Committed { warnings }
    }
}

impl fmt::Debug for GuardrailChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.guards.iter().map(|g| g.name()).collect();
        f.debug_struct("GuardrailChain").field("guards", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(Verdict);

    impl Guardrail for Always {
        fn name(&self) -> &'static str {
            "always"
        }
        fn check(&self, _artifact: &TaskArtifact, _ctx: &GuardrailContext) -> Verdict {
            self.0.clone()
        }
    }

    fn artifact() -> TaskArtifact {
        TaskArtifact::Text("output".into())
    }

    #[test]
    fn test_empty_chain_commits() {
        let chain = GuardrailChain::new();
        let outcome = chain.evaluate(&artifact(), &GuardrailContext::new("dev"), true);
        assert!(matches!(outcome, ChainOutcome::Committed { warnings } if warnings.is_empty()));
    }

    #[test]
    fn test_warnings_accumulate() {
        let chain = GuardrailChain::new()
            .with(Always(Verdict::warn("a", "first")))
            .with(Always(Verdict::warn("b", "second")))
            .with(Always(Verdict::pass("c")));
        let outcome = chain.evaluate(&artifact(), &GuardrailContext::new("dev"), true);
        match outcome {
            ChainOutcome::Committed { warnings } => assert_eq!(warnings.len(), 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_fail_with_budget_retries_and_keeps_warnings() {
        let chain = GuardrailChain::new()
            .with(Always(Verdict::warn("a", "heads up")))
            .with(Always(Verdict::fail("b", "fix this")))
            .with(Always(Verdict::pass("c")));
        let outcome = chain.evaluate(&artifact(), &GuardrailContext::new("dev"), true);
        match outcome {
            ChainOutcome::Retry { verdict, warnings } => {
                assert_eq!(verdict.category, "b");
                assert_eq!(warnings.len(), 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_fail_without_budget_rejects() {
        let chain = GuardrailChain::new().with(Always(Verdict::fail("b", "fix this")));
        let outcome = chain.evaluate(&artifact(), &GuardrailContext::new("dev"), false);
        assert!(matches!(outcome, ChainOutcome::Rejected { .. }));
    }

    #[test]
    fn test_fail_no_retry_rejects_even_with_budget() {
        let chain = GuardrailChain::new().with(Always(Verdict::fail("b", "final").no_retry()));
        let outcome = chain.evaluate(&artifact(), &GuardrailContext::new("dev"), true);
        assert!(matches!(outcome, ChainOutcome::Rejected { .. }));
    }

    #[test]
    fn test_critical_short_circuits_before_later_guards() {
        let chain = GuardrailChain::new()
            .with(Always(Verdict::critical("security", "dangerous")))
            .with(Always(Verdict::warn("late", "never reached")));
        let outcome = chain.evaluate(&artifact(), &GuardrailContext::new("dev"), true);
        match outcome {
            ChainOutcome::Retry { verdict, warnings } => {
                assert!(verdict.is_critical());
                assert!(warnings.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_critical_without_budget_rejects() {
        let chain = GuardrailChain::new().with(Always(Verdict::critical("security", "dangerous")));
        let outcome = chain.evaluate(&artifact(), &GuardrailContext::new("dev"), false);
        match outcome {
            ChainOutcome::Rejected { verdict, .. } => assert!(verdict.is_critical()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_verdict_display() {
        let verdict = Verdict::fail("quality.length", "file too long");
        let text = verdict.to_string();
        assert!(text.contains("quality.length"));
        assert!(text.contains("file too long"));
    }
}
