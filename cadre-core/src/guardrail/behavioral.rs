//! Behavioral guardrails: role adherence, scope control, delegation rules,
//! output shape, and iteration limits

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::guardrail::{Guardrail, GuardrailContext, Verdict};
use crate::model::{ArtifactKind, Requirements, TaskArtifact};

// ---------------------------------------------------------------------------
// Role adherence
// ---------------------------------------------------------------------------

/// Roles allowed to delegate work to other workers
pub const ALLOWED_DELEGATORS: &[&str] = &["manager", "architect", "tech_lead"];

struct RoleRestriction {
    forbidden: Vec<(Regex, &'static str)>,
    message: &'static str,
}

static ROLE_RESTRICTIONS: LazyLock<HashMap<&'static str, RoleRestriction>> = LazyLock::new(|| {
    fn compile(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
        patterns
            .iter()
            .map(|(pattern, label)| {
                (
                    Regex::new(&format!("(?i){pattern}")).expect("role pattern must compile"),
                    *label,
                )
            })
            .collect()
    }

    let mut map = HashMap::new();
    map.insert(
        "qa_engineer",
        RoleRestriction {
            forbidden: compile(&[
                (r"def\s+(?:[a-zA-Z_]\w*)\s*\(", "function definition"),
                (r"class\s+(?:[A-Z]\w*)\s*[:\(]", "class definition"),
            ]),
            message: "QA engineer should only produce test code and reports, not production source.",
        },
    );
    map.insert(
        "product_owner",
        RoleRestriction {
            forbidden: compile(&[
                (r"def\s+\w+\s*\(", "implementation (function definition)"),
                (r"class\s+\w+\s*[:\(]", "implementation (class definition)"),
                (r"(?m)^\s*import\s+\w+", "code imports"),
            ]),
            message: "Product owner should focus on requirements, not implementation.",
        },
    );
    map.insert(
        "architect",
        RoleRestriction {
            forbidden: compile(&[
                (r"INSERT\s+INTO", "data manipulation"),
                (r"DELETE\s+FROM", "data manipulation"),
                (r"UPDATE\s+\w+\s+SET", "data manipulation"),
            ]),
            message: "Architect should design systems, not implement data operations.",
        },
    );
    map.insert(
        "backend_developer",
        RoleRestriction {
            forbidden: compile(&[
                (r"<script\b", "frontend script tag"),
                (r"<style\b", "frontend style tag"),
                (r"useState\s*\(|useEffect\s*\(|React\.", "React frontend code"),
                (r"createApp\s*\(|Vue\.", "Vue frontend code"),
                (r"@media\s+", "standalone CSS"),
            ]),
            message: "Backend developer should not generate frontend UI code.",
        },
    );
    map.insert(
        "frontend_developer",
        RoleRestriction {
            forbidden: compile(&[
                (r"CREATE\s+TABLE|ALTER\s+TABLE|DROP\s+TABLE", "database DDL"),
                (r"INSERT\s+INTO|DELETE\s+FROM|UPDATE\s+\w+\s+SET", "database DML"),
                (r"FastAPI\s*\(|@app\.route|flask\.", "backend server framework"),
            ]),
            message: "Frontend developer should not generate backend or database code.",
        },
    );
    map.insert(
        "manager",
        RoleRestriction {
            forbidden: compile(&[
                (r"def\s+\w+\s*\(", "code implementation (function definition)"),
                (r"class\s+\w+\s*[:\(]", "code implementation (class definition)"),
            ]),
            message: "Manager should coordinate and delegate, not produce implementation code.",
        },
    );
    map
});

fn normalize_role(role: &str) -> String {
    role.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Verifies the worker stayed within its role boundaries
#[derive(Debug, Clone, Default)]
pub struct RoleAdherence;

impl RoleAdherence {
    pub fn new() -> Self {
        Self
    }
}

impl Guardrail for RoleAdherence {
    fn name(&self) -> &'static str {
        "behavioral.role_adherence"
    }

    fn check(&self, artifact: &TaskArtifact, ctx: &GuardrailContext) -> Verdict {
        let role = normalize_role(&ctx.role);
        let Some(restriction) = ROLE_RESTRICTIONS.get(role.as_str()) else {
            return Verdict::pass(self.name());
        };

        // QA output legitimately contains test functions; only flag
        // production-shaped definitions.
        let text = artifact.scan_text();
        let violations: Vec<&str> = restriction
            .forbidden
            .iter()
            .filter(|(re, _)| {
                if role == "qa_engineer" {
                    re.find_iter(&text).any(|m| {
                        let matched = m.as_str();
                        !matched.contains("test_") && !matched.contains("Test")
                    })
                } else {
                    re.is_match(&text)
                }
            })
            .map(|(_, label)| *label)
            .collect();

        if violations.is_empty() {
            return Verdict::pass(self.name());
        }
        Verdict::fail(self.name(), restriction.message).with_details(serde_json::json!({
            "role": ctx.role,
            "violations": violations,
        }))
    }
}

// ---------------------------------------------------------------------------
// Scope control
// ---------------------------------------------------------------------------

const MIN_RELEVANCE: f64 = 0.35;
const MAX_EXPANSION: f64 = 0.25;

/// Ensures output addresses the current requirements rather than drifting
/// into unrequested features
#[derive(Debug, Clone, Default)]
pub struct ScopeControl;

impl ScopeControl {
    pub fn new() -> Self {
        Self
    }

    fn keywords(text: &str) -> std::collections::HashSet<String> {
        static WORD: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\b[a-zA-Z]{4,}\b").expect("word pattern must compile"));
        WORD.find_iter(&text.to_lowercase())
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

impl Guardrail for ScopeControl {
    fn name(&self) -> &'static str {
        "behavioral.scope"
    }

    fn check(&self, artifact: &TaskArtifact, ctx: &GuardrailContext) -> Verdict {
        let Some(ref requirements) = ctx.requirements else {
            return Verdict::pass(self.name());
        };
        let required = Self::keywords(&requirements.keyword_text());
        if required.is_empty() {
            return Verdict::pass(self.name());
        }
        let produced = Self::keywords(&artifact.scan_text());
        let overlap = required.intersection(&produced).count() as f64 / required.len() as f64;
        let extra: Vec<&String> = produced.difference(&required).take(10).collect();

        if overlap < MIN_RELEVANCE {
            return Verdict::fail(
                self.name(),
                format!(
                    "output deviates from task scope (relevance {:.0}% below {:.0}%)",
                    overlap * 100.0,
                    MIN_RELEVANCE * 100.0
                ),
            )
            .with_details(serde_json::json!({
                "relevance_ratio": overlap,
                "possible_scope_creep": extra,
            }));
        }
        if overlap < 1.0 - MAX_EXPANSION && produced.len() > required.len() * 3 {
            return Verdict::warn(
                self.name(),
                "output may include scope creep; focus on the stated requirements",
            )
            .with_details(serde_json::json!({
                "relevance_ratio": overlap,
                "possible_scope_creep": extra,
            }));
        }
        Verdict::pass(self.name())
    }
}

// ---------------------------------------------------------------------------
// Delegation rules
// ---------------------------------------------------------------------------

/// Validate one delegation decision: only designated coordinator roles may
/// delegate, and a delegation chain must not revisit a worker.
pub fn delegation_verdict(delegator: &str, target: &str, chain: &[String]) -> Verdict {
    const NAME: &str = "behavioral.delegation";
    let delegator_norm = normalize_role(delegator);
    let target_norm = normalize_role(target);

    if !ALLOWED_DELEGATORS.contains(&delegator_norm.as_str()) {
        return Verdict::fail(
            NAME,
            format!("role '{delegator}' is not allowed to delegate"),
        )
        .with_details(serde_json::json!({
            "delegator": delegator,
            "target": target,
            "allowed_delegators": ALLOWED_DELEGATORS,
        }));
    }
    if chain.iter().any(|c| normalize_role(c) == target_norm) {
        return Verdict::fail(
            NAME,
            "circular delegation detected: target is already in the delegation chain",
        )
        .with_details(serde_json::json!({
            "delegator": delegator,
            "target": target,
            "chain": chain,
        }));
    }
    Verdict::pass(NAME)
}

// ---------------------------------------------------------------------------
// Output shape
// ---------------------------------------------------------------------------

/// Validates that the artifact matches the kind the task declared
#[derive(Debug, Clone)]
pub struct OutputShape {
    expected: ArtifactKind,
}

impl OutputShape {
    pub fn new(expected: ArtifactKind) -> Self {
        Self { expected }
    }
}

impl Guardrail for OutputShape {
    fn name(&self) -> &'static str {
        "behavioral.output_shape"
    }

    fn check(&self, artifact: &TaskArtifact, _ctx: &GuardrailContext) -> Verdict {
        if artifact.kind() == self.expected {
            return Verdict::pass(self.name());
        }
        Verdict::fail(
            self.name(),
            format!(
                "expected {} output, got {}",
                self.expected,
                artifact.kind()
            ),
        )
        .with_details(serde_json::json!({
            "expected": self.expected.name(),
            "actual": artifact.kind().name(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Requirements completeness
// ---------------------------------------------------------------------------

/// Fails requirements documents that are too thin to plan against
#[derive(Debug, Clone, Default)]
pub struct RequirementsCompleteness;

impl RequirementsCompleteness {
    pub fn new() -> Self {
        Self
    }
}

impl Guardrail for RequirementsCompleteness {
    fn name(&self) -> &'static str {
        "behavioral.requirements_completeness"
    }

    fn check(&self, artifact: &TaskArtifact, _ctx: &GuardrailContext) -> Verdict {
        let Some(requirements) = artifact.as_requirements() else {
            return Verdict::pass(self.name());
        };
        if !requirements.has_minimum_stories() {
            return Verdict::fail(
                self.name(),
                format!(
                    "requirements must include at least {} user stories, found {}",
                    Requirements::MIN_USER_STORIES,
                    requirements.user_stories.len()
                ),
            )
            .with_details(serde_json::json!({
                "user_stories": requirements.user_stories.len(),
                "minimum": Requirements::MIN_USER_STORIES,
            }));
        }
        let missing_criteria: Vec<&str> = requirements
            .user_stories
            .iter()
            .filter(|story| story.acceptance_criteria.is_empty())
            .map(|story| story.id.as_str())
            .collect();
        if !missing_criteria.is_empty() {
            return Verdict::warn(
                self.name(),
                "some user stories have no acceptance criteria",
            )
            .with_details(serde_json::json!({ "stories": missing_criteria }));
        }
        Verdict::pass(self.name())
    }
}

// ---------------------------------------------------------------------------
// Iteration limit
// ---------------------------------------------------------------------------

/// Prevents runaway worker loops: warns at 80% of the iteration cap, fails
/// (without retry) at the cap
#[derive(Debug, Clone, Default)]
pub struct IterationLimit;

impl IterationLimit {
    pub fn new() -> Self {
        Self
    }
}

impl Guardrail for IterationLimit {
    fn name(&self) -> &'static str {
        "behavioral.iteration_limit"
    }

    fn check(&self, _artifact: &TaskArtifact, ctx: &GuardrailContext) -> Verdict {
        if ctx.max_iterations == 0 {
            return Verdict::fail(self.name(), "iteration cap must be positive").no_retry();
        }
        if ctx.iteration >= ctx.max_iterations {
            return Verdict::fail(
                self.name(),
                format!(
                    "iteration limit reached ({}/{})",
                    ctx.iteration, ctx.max_iterations
                ),
            )
            .no_retry()
            .with_details(serde_json::json!({
                "iteration": ctx.iteration,
                "max_iterations": ctx.max_iterations,
            }));
        }
        let warn_at = (ctx.max_iterations as f64 * 0.8) as u32;
        if ctx.iteration >= warn_at {
            return Verdict::warn(
                self.name(),
                format!(
                    "approaching iteration limit ({}/{})",
                    ctx.iteration, ctx.max_iterations
                ),
            );
        }
        Verdict::pass(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AcceptanceCriterion, CodeFile, Priority, TestRun, UserStory,
    };

    fn text(content: &str) -> TaskArtifact {
        TaskArtifact::Text(content.into())
    }

    fn reqs(stories: usize) -> Requirements {
        Requirements {
            project_name: "todo api".into(),
            description: "manage todo items over http endpoints".into(),
            target_users: vec!["developers".into()],
            user_stories: (0..stories)
                .map(|i| UserStory {
                    as_a: "user".into(),
                    i_want: format!("endpoint number {i}"),
                    so_that: "items persist".into(),
                    acceptance_criteria: vec![AcceptanceCriterion {
                        description: "returns expected status".into(),
                        testable: true,
                    }],
                    priority: Priority::Must,
                    id: format!("US-{i}"),
                })
                .collect(),
            non_functional_requirements: Vec::new(),
            assumptions: Vec::new(),
            constraints: Vec::new(),
            confidence: 1.0,
        }
    }

    #[test]
    fn test_backend_role_rejects_frontend_output() {
        let ctx = GuardrailContext::new("backend_developer");
        let artifact = TaskArtifact::CodeFiles(vec![CodeFile::new(
            "ui/App.jsx",
            "const [state, setState] = useState(0);",
            "javascript",
        )]);
        let verdict = RoleAdherence::new().check(&artifact, &ctx);
        assert!(verdict.is_fail());
    }

    #[test]
    fn test_backend_role_accepts_backend_output() {
        let ctx = GuardrailContext::new("backend_developer");
        let artifact = TaskArtifact::CodeFiles(vec![CodeFile::new(
            "src/api.py",
            "def health():\n    return {'status': 'ok'}\n",
            "python",
        )]);
        let verdict = RoleAdherence::new().check(&artifact, &ctx);
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_qa_role_allows_test_functions() {
        let ctx = GuardrailContext::new("qa_engineer");
        let artifact = TaskArtifact::CodeFiles(vec![CodeFile::new(
            "tests/test_api.py",
            "def test_health():\n    assert client.get('/health').status_code == 200\n",
            "python",
        )]);
        let verdict = RoleAdherence::new().check(&artifact, &ctx);
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_qa_role_rejects_production_code() {
        let ctx = GuardrailContext::new("qa_engineer");
        let artifact = TaskArtifact::CodeFiles(vec![CodeFile::new(
            "src/api.py",
            "def create_item(payload):\n    return db.insert(payload)\n",
            "python",
        )]);
        let verdict = RoleAdherence::new().check(&artifact, &ctx);
        assert!(verdict.is_fail());
    }

    #[test]
    fn test_unknown_role_passes() {
        let ctx = GuardrailContext::new("devops_engineer");
        let verdict = RoleAdherence::new().check(&text("FROM python:3.12"), &ctx);
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_scope_control_fails_unrelated_output() {
        let ctx = GuardrailContext::new("backend_developer").with_requirements(reqs(3));
        let verdict = ScopeControl::new().check(
            &text("completely unrelated blockchain mining simulator daemon"),
            &ctx,
        );
        assert!(verdict.is_fail());
    }

    #[test]
    fn test_scope_control_passes_related_output() {
        let ctx = GuardrailContext::new("backend_developer").with_requirements(reqs(3));
        let verdict = ScopeControl::new().check(
            &text(
                "todo items endpoint returns expected status; items persist; \
                 manage endpoint number developers http",
            ),
            &ctx,
        );
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_scope_control_without_requirements_passes() {
        let ctx = GuardrailContext::new("backend_developer");
        let verdict = ScopeControl::new().check(&text("anything"), &ctx);
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_delegation_requires_coordinator_role() {
        let verdict = delegation_verdict("backend_developer", "qa_engineer", &[]);
        assert!(verdict.is_fail());

        let verdict = delegation_verdict("manager", "qa_engineer", &[]);
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_delegation_cycle_rejected() {
        let chain = vec!["manager".to_string(), "qa_engineer".to_string()];
        let verdict = delegation_verdict("manager", "QA Engineer", &chain);
        assert!(verdict.is_fail());
        assert!(verdict.message.contains("circular"));
    }

    #[test]
    fn test_output_shape_mismatch() {
        let guard = OutputShape::new(ArtifactKind::TestReport);
        let ctx = GuardrailContext::new("qa_engineer");
        assert!(guard.check(&text("free text"), &ctx).is_fail());
        assert!(guard
            .check(&TaskArtifact::TestReport(TestRun::default()), &ctx)
            .is_ok());
    }

    #[test]
    fn test_requirements_completeness_minimum_stories() {
        let ctx = GuardrailContext::new("product_owner");
        let guard = RequirementsCompleteness::new();

        let verdict = guard.check(&TaskArtifact::Requirements(reqs(2)), &ctx);
        assert!(verdict.is_fail());
        assert!(verdict.message.contains("at least 3"));

        let verdict = guard.check(&TaskArtifact::Requirements(reqs(3)), &ctx);
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_requirements_completeness_warns_missing_criteria() {
        let ctx = GuardrailContext::new("product_owner");
        let mut requirements = reqs(3);
        requirements.user_stories[1].acceptance_criteria.clear();
        let verdict =
            RequirementsCompleteness::new().check(&TaskArtifact::Requirements(requirements), &ctx);
        assert_eq!(verdict.status, crate::guardrail::Status::Warn);
    }

    #[test]
    fn test_iteration_limit_bands() {
        let guard = IterationLimit::new();
        let artifact = text("output");

        let ctx = GuardrailContext::new("dev").with_iteration(3, 10);
        assert!(guard.check(&artifact, &ctx).is_ok());

        let ctx = GuardrailContext::new("dev").with_iteration(8, 10);
        assert_eq!(
            guard.check(&artifact, &ctx).status,
            crate::guardrail::Status::Warn
        );

        let ctx = GuardrailContext::new("dev").with_iteration(10, 10);
        let verdict = guard.check(&artifact, &ctx);
        assert!(verdict.is_fail());
        assert!(!verdict.retry_allowed);
    }
}
