//! Quality guardrails: size thresholds, documentation, coverage, dependency
//! policy, and architecture compliance

use regex::Regex;
use std::sync::LazyLock;

use crate::guardrail::{Guardrail, GuardrailContext, Verdict};
use crate::model::{CodeFile, FileKind, TaskArtifact};

/// Maximum lines allowed in a generated source file
pub const MAX_FILE_LINES: usize = 500;
/// Maximum lines allowed in a single function
pub const MAX_FUNCTION_LINES: usize = 50;

// ---------------------------------------------------------------------------
// Source quality: file and function length
// ---------------------------------------------------------------------------

static FUNCTION_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub\s+)?(?:async\s+)?(?:def|fn|function)\s+\w+")
        .expect("function pattern must compile")
});

fn oversized_functions(content: &str) -> Vec<usize> {
    let starts: Vec<usize> = FUNCTION_START
        .find_iter(content)
        .map(|m| content[..m.start()].lines().count())
        .collect();
    let total_lines = content.lines().count();
    let mut oversized = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(total_lines);
        let len = end.saturating_sub(start);
        if len > MAX_FUNCTION_LINES {
            oversized.push(start + 1);
        }
    }
    oversized
}

/// Enforces file-length and function-length thresholds on generated source
#[derive(Debug, Clone, Default)]
pub struct SourceQuality;

impl SourceQuality {
    pub fn new() -> Self {
        Self
    }
}

impl Guardrail for SourceQuality {
    fn name(&self) -> &'static str {
        "quality.source"
    }

    fn check(&self, artifact: &TaskArtifact, ctx: &GuardrailContext) -> Verdict {
        let Some(files) = artifact.as_code_files() else {
            return Verdict::pass(self.name());
        };
        let mut issues = Vec::new();
        for file in files {
            if file.kind != FileKind::Source && file.kind != FileKind::Test {
                continue;
            }
            let lines = file.line_count();
            if lines > MAX_FILE_LINES {
                issues.push(format!(
                    "{} has {lines} lines (limit {MAX_FILE_LINES})",
                    file.path
                ));
            }
            for line in oversized_functions(&file.content) {
                issues.push(format!(
                    "{}:{line} function exceeds {MAX_FUNCTION_LINES} lines",
                    file.path
                ));
            }
        }
        if issues.is_empty() {
            return Verdict::pass(self.name());
        }
        // Each threshold violation costs 4 points on a 0..=10 scale; the
        // configured threshold decides whether the result blocks or warns.
        let score = (10.0 - 4.0 * issues.len() as f64).max(0.0);
        let message = format!("source quality score {score:.1}: {}", issues.join("; "));
        let details = serde_json::json!({ "score": score, "issues": issues });
        if score < ctx.quality_score_threshold {
            Verdict::fail(self.name(), message).with_details(details)
        } else {
            Verdict::warn(self.name(), message).with_details(details)
        }
    }
}

// ---------------------------------------------------------------------------
// Documentation presence on public functions
// ---------------------------------------------------------------------------

static PY_PUBLIC_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*def\s+([a-zA-Z][a-zA-Z0-9_]*)\s*\(([^)]*)\)\s*(->\s*[^:]+)?:")
        .expect("python def pattern must compile")
});

static RS_PUB_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(\s*)pub\s+(?:async\s+)?fn\s+([a-zA-Z_]\w*)")
        .expect("rust fn pattern must compile")
});

fn python_doc_issues(file: &CodeFile) -> Vec<String> {
    let mut issues = Vec::new();
    let content = &file.content;
    for caps in PY_PUBLIC_DEF.captures_iter(content) {
        let name = &caps[1];
        if name.starts_with('_') || name.starts_with("test_") {
            continue;
        }
        let def_end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let following: String = content[def_end..].chars().take(160).collect();
        if !following.trim_start().starts_with("\"\"\"")
            && !following.trim_start().starts_with("'''")
        {
            issues.push(format!("{}: '{}' missing docstring", file.path, name));
        }
        let has_return_hint = caps.get(3).is_some();
        let params = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let has_params = !params.trim().is_empty() && params.trim() != "self";
        if has_params && !params.contains(':') {
            issues.push(format!(
                "{}: '{}' missing parameter type hints",
                file.path, name
            ));
        }
        if !has_return_hint {
            issues.push(format!(
                "{}: '{}' missing return type hint",
                file.path, name
            ));
        }
    }
    issues
}

fn rust_doc_issues(file: &CodeFile) -> Vec<String> {
    let mut issues = Vec::new();
    let lines: Vec<&str> = file.content.lines().collect();
    for caps in RS_PUB_FN.captures_iter(&file.content) {
        let name = &caps[2];
        let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let line_idx = file.content[..offset].lines().count();
        let documented = line_idx > 0
            && lines
                .get(line_idx.saturating_sub(1))
                .map(|l| l.trim_start().starts_with("///") || l.trim_start().starts_with("#["))
                .unwrap_or(false);
        if !documented {
            issues.push(format!("{}: 'pub fn {}' missing doc comment", file.path, name));
        }
    }
    issues
}

/// Warns when public functions lack documentation or type signatures
#[derive(Debug, Clone, Default)]
pub struct DocPresence;

impl DocPresence {
    pub fn new() -> Self {
        Self
    }
}

impl Guardrail for DocPresence {
    fn name(&self) -> &'static str {
        "quality.docs"
    }

    fn check(&self, artifact: &TaskArtifact, _ctx: &GuardrailContext) -> Verdict {
        let Some(files) = artifact.as_code_files() else {
            return Verdict::pass(self.name());
        };
        let mut issues = Vec::new();
        for file in files {
            if file.kind != FileKind::Source {
                continue;
            }
            match file.language.to_lowercase().as_str() {
                "python" | "py" => issues.extend(python_doc_issues(file)),
                "rust" | "rs" => issues.extend(rust_doc_issues(file)),
                _ => {}
            }
        }
        if issues.is_empty() {
            return Verdict::pass(self.name());
        }
        Verdict::warn(
            self.name(),
            format!("documentation gaps: {}", issues.join("; ")),
        )
        .with_details(serde_json::json!({ "issues": issues }))
    }
}

// ---------------------------------------------------------------------------
// Coverage threshold
// ---------------------------------------------------------------------------

/// Enforces the minimum coverage ratio on test outputs.
///
/// Coverage exactly at the threshold passes; strictly below fails.
#[derive(Debug, Clone, Default)]
pub struct CoverageThreshold;

impl CoverageThreshold {
    pub fn new() -> Self {
        Self
    }
}

impl Guardrail for CoverageThreshold {
    fn name(&self) -> &'static str {
        "quality.coverage"
    }

    fn check(&self, artifact: &TaskArtifact, ctx: &GuardrailContext) -> Verdict {
        let Some(run) = artifact.as_test_report() else {
            return Verdict::pass(self.name());
        };
        if run.meets_coverage(ctx.coverage_threshold) {
            let zero_files: Vec<&str> = run
                .per_file
                .iter()
                .filter(|f| f.line_coverage == 0.0)
                .map(|f| f.path.as_str())
                .collect();
            if !zero_files.is_empty() {
                return Verdict::warn(
                    self.name(),
                    format!("files with no coverage: {}", zero_files.join(", ")),
                );
            }
            return Verdict::pass(self.name());
        }
        Verdict::fail(
            self.name(),
            format!(
                "coverage {:.0}% is below the minimum {:.0}%",
                run.coverage * 100.0,
                ctx.coverage_threshold * 100.0
            ),
        )
        .with_details(serde_json::json!({
            "coverage": run.coverage,
            "threshold": ctx.coverage_threshold,
        }))
    }
}

// ---------------------------------------------------------------------------
// Documentation presence for the delivered artifact set
// ---------------------------------------------------------------------------

/// Requires delivered outputs to carry documentation: a doc file among
/// generated files, or a runbook on deployment bundles
#[derive(Debug, Clone, Default)]
pub struct DocumentationPresence;

impl DocumentationPresence {
    pub fn new() -> Self {
        Self
    }
}

impl Guardrail for DocumentationPresence {
    fn name(&self) -> &'static str {
        "quality.documentation"
    }

    fn check(&self, artifact: &TaskArtifact, _ctx: &GuardrailContext) -> Verdict {
        match artifact {
            TaskArtifact::CodeFiles(files) => {
                let has_doc = files.iter().any(|f| {
                    f.kind == FileKind::Doc
                        || f.path.to_lowercase().contains("readme")
                });
                if has_doc {
                    Verdict::pass(self.name())
                } else {
                    Verdict::warn(self.name(), "no documentation file in generated output")
                }
            }
            TaskArtifact::Deployment(bundle) => {
                if bundle.runbook.trim().is_empty() {
                    Verdict::fail(self.name(), "deployment bundle is missing a runbook")
                } else {
                    Verdict::pass(self.name())
                }
            }
            _ => Verdict::pass(self.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Dependency policy
// ---------------------------------------------------------------------------

static LATEST_PIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?mi)(==\s*latest\b|:\s*"latest"|=\s*"latest"|@latest\b)"#)
        .expect("latest pattern must compile")
});

static REQUIREMENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(==|>=|<=|~=|>|<)?")
        .expect("requirement pattern must compile")
});

fn is_manifest(file: &CodeFile) -> bool {
    let name = file
        .path
        .rsplit('/')
        .next()
        .unwrap_or(&file.path)
        .to_lowercase();
    matches!(
        name.as_str(),
        "requirements.txt" | "package.json" | "cargo.toml" | "pyproject.toml" | "go.mod"
    )
}

/// Checks dependency manifests for floating "latest" pins and blocklisted
/// packages
#[derive(Debug, Clone, Default)]
pub struct DependencyPolicy;

impl DependencyPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Guardrail for DependencyPolicy {
    fn name(&self) -> &'static str {
        "quality.dependencies"
    }

    fn check(&self, artifact: &TaskArtifact, ctx: &GuardrailContext) -> Verdict {
        let Some(files) = artifact.as_code_files() else {
            return Verdict::pass(self.name());
        };
        let mut failures = Vec::new();
        let mut unpinned = Vec::new();

        for file in files.iter().filter(|f| is_manifest(f)) {
            if LATEST_PIN.is_match(&file.content) {
                failures.push(format!("{}: floating 'latest' version pin", file.path));
            }
            for blocked in &ctx.dependency_blocklist {
                let needle = blocked.to_lowercase();
                if file.content.to_lowercase().contains(&needle) {
                    failures.push(format!("{}: blocklisted package '{blocked}'", file.path));
                }
            }
            if file.path.to_lowercase().ends_with("requirements.txt") {
                for caps in REQUIREMENT_LINE.captures_iter(&file.content) {
                    if caps.get(2).is_none() {
                        unpinned.push(caps[1].to_string());
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Verdict::fail(
                self.name(),
                format!("dependency policy: {}", failures.join("; ")),
            )
            .with_details(serde_json::json!({
                "failures": failures,
                "unpinned": unpinned,
            }));
        }
        if !unpinned.is_empty() {
            return Verdict::warn(
                self.name(),
                format!("unpinned packages: {}", unpinned.join(", ")),
            );
        }
        Verdict::pass(self.name())
    }
}

// ---------------------------------------------------------------------------
// Architecture compliance
// ---------------------------------------------------------------------------

/// Verifies each generated source file lives under a module that maps to a
/// declared architecture component
#[derive(Debug, Clone, Default)]
pub struct ArchitectureCompliance;

impl ArchitectureCompliance {
    pub fn new() -> Self {
        Self
    }

    fn module_of(path: &str) -> Option<String> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        // Conventional source prefixes are transparent
        if matches!(first, "src" | "lib" | "app") {
            segments
                .next()
                .map(|s| s.trim_end_matches(|c: char| c == '/').to_string())
        } else {
            Some(first.to_string())
        }
    }
}

impl Guardrail for ArchitectureCompliance {
    fn name(&self) -> &'static str {
        "quality.architecture"
    }

    fn check(&self, artifact: &TaskArtifact, ctx: &GuardrailContext) -> Verdict {
        let Some(files) = artifact.as_code_files() else {
            return Verdict::pass(self.name());
        };
        let Some(ref architecture) = ctx.architecture else {
            return Verdict::pass(self.name());
        };
        let components = architecture.component_names();
        if components.is_empty() {
            return Verdict::pass(self.name());
        }

        let mut misplaced = Vec::new();
        for file in files {
            if file.kind != FileKind::Source {
                continue;
            }
            let Some(module) = Self::module_of(&file.path) else {
                continue;
            };
            let module = module
                .trim_end_matches(".py")
                .trim_end_matches(".rs")
                .trim_end_matches(".js")
                .trim_end_matches(".ts")
                .to_lowercase()
                .replace('-', "_");
            let matches_component = components
                .iter()
                .any(|c| c.contains(&module) || module.contains(c.as_str()));
            if !matches_component {
                misplaced.push(file.path.clone());
            }
        }

        if misplaced.is_empty() {
            return Verdict::pass(self.name());
        }
        Verdict::fail(
            self.name(),
            format!(
                "files outside declared components: {}",
                misplaced.join(", ")
            ),
        )
        .with_details(serde_json::json!({
            "misplaced": misplaced,
            "components": components,
        }))
    }
}
