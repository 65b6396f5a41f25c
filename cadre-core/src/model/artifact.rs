//! Code files, deployment bundles, and the task artifact envelope

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::architecture::Architecture;
use crate::model::requirements::Requirements;
use crate::model::testing::TestRun;

/// What a generated file is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    Source,
    Test,
    Config,
    Doc,
}

/// A generated code file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFile {
    /// Relative path under the run workspace
    pub path: String,
    pub content: String,
    pub language: String,
    #[serde(default)]
    pub kind: FileKind,
    /// Paths of files this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl CodeFile {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            language: language.into(),
            kind: FileKind::Source,
            dependencies: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn is_test(&self) -> bool {
        self.kind == FileKind::Test
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

/// Final deployment output: packaging plus operational docs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentBundle {
    /// Container build file content
    #[serde(default)]
    pub container_file: Option<String>,
    /// Service composition file content
    #[serde(default)]
    pub compose_file: Option<String>,
    /// CI pipeline configuration content
    #[serde(default)]
    pub pipeline_config: Option<String>,
    /// Required environment variables
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Operational runbook / deployment documentation
    #[serde(default)]
    pub runbook: String,
}

impl DeploymentBundle {
    /// Whether the bundle contains anything deployable
    pub fn is_empty(&self) -> bool {
        self.container_file.is_none()
            && self.compose_file.is_none()
            && self.pipeline_config.is_none()
            && self.environment.is_empty()
            && self.runbook.is_empty()
    }
}

/// Expected output type a task declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Requirements,
    Architecture,
    CodeFiles,
    TestReport,
    Deployment,
    Text,
}

impl ArtifactKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Requirements => "requirements",
            ArtifactKind::Architecture => "architecture",
            ArtifactKind::CodeFiles => "code_files",
            ArtifactKind::TestReport => "test_report",
            ArtifactKind::Deployment => "deployment",
            ArtifactKind::Text => "text",
        }
    }

    /// JSON skeleton appended to prompts so the model knows the shape
    pub fn schema_hint(&self) -> &'static str {
        match self {
            ArtifactKind::Requirements => {
                r#"{"project_name": "...", "description": "...", "target_users": ["..."], "user_stories": [{"as_a": "...", "i_want": "...", "so_that": "...", "acceptance_criteria": [{"description": "...", "testable": true}], "priority": "must|should|could|wont", "id": "US-1"}], "non_functional_requirements": [{"category": "...", "description": "...", "measurable": true}], "assumptions": ["..."], "constraints": ["..."], "confidence": 0.0}"#
            }
            ArtifactKind::Architecture => {
                r#"{"system_overview": "...", "components": [{"name": "...", "responsibility": "..."}], "technology_stack": [{"name": "...", "category": "...", "justification": "..."}], "interface_contracts": [{"provider": "...", "consumer": "...", "contract_type": "...", "description": "..."}], "data_entities": "...", "deployment_topology": "...", "decisions": [{"title": "...", "status": "accepted", "context": "...", "decision": "...", "consequences": "..."}]}"#
            }
            ArtifactKind::CodeFiles => {
                r#"[{"path": "src/main.py", "content": "...", "language": "python", "kind": "source|test|config|doc", "dependencies": [], "description": "..."}]"#
            }
            ArtifactKind::TestReport => {
                r#"{"total": 0, "passed": 0, "failed": 0, "errored": 0, "skipped": 0, "coverage": 0.0, "per_file": [{"path": "...", "line_coverage": 0.0}], "failing": ["test_name"], "traces": ["..."], "raw_output": "..."}"#
            }
            ArtifactKind::Deployment => {
                r#"{"container_file": "...", "compose_file": "...", "pipeline_config": "...", "environment": {"KEY": "value"}, "runbook": "..."}"#
            }
            ArtifactKind::Text => r#"free text"#,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Typed output of one task attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TaskArtifact {
    Requirements(Requirements),
    Architecture(Architecture),
    CodeFiles(Vec<CodeFile>),
    TestReport(TestRun),
    Deployment(DeploymentBundle),
    Text(String),
}

impl TaskArtifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            TaskArtifact::Requirements(_) => ArtifactKind::Requirements,
            TaskArtifact::Architecture(_) => ArtifactKind::Architecture,
            TaskArtifact::CodeFiles(_) => ArtifactKind::CodeFiles,
            TaskArtifact::TestReport(_) => ArtifactKind::TestReport,
            TaskArtifact::Deployment(_) => ArtifactKind::Deployment,
            TaskArtifact::Text(_) => ArtifactKind::Text,
        }
    }

    pub fn as_requirements(&self) -> Option<&Requirements> {
        match self {
            TaskArtifact::Requirements(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_architecture(&self) -> Option<&Architecture> {
        match self {
            TaskArtifact::Architecture(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_code_files(&self) -> Option<&[CodeFile]> {
        match self {
            TaskArtifact::CodeFiles(files) => Some(files),
            _ => None,
        }
    }

    pub fn as_test_report(&self) -> Option<&TestRun> {
        match self {
            TaskArtifact::TestReport(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_deployment(&self) -> Option<&DeploymentBundle> {
        match self {
            TaskArtifact::Deployment(d) => Some(d),
            _ => None,
        }
    }

    /// All scannable text in the artifact, used by pattern guardrails
    pub fn scan_text(&self) -> String {
        match self {
            TaskArtifact::Text(text) => text.clone(),
            TaskArtifact::CodeFiles(files) => files
                .iter()
                .map(|f| f.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }

    /// Compact rendering inlined into dependent tasks' context
    pub fn render_for_context(&self) -> String {
        match self {
            TaskArtifact::Text(text) => text.clone(),
            TaskArtifact::CodeFiles(files) => {
                let mut out = String::new();
                for file in files {
                    out.push_str(&format!("--- {} ({})\n", file.path, file.language));
                    out.push_str(&file.content);
                    out.push('\n');
                }
                out
            }
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_file_builder() {
        let file = CodeFile::new("tests/test_api.py", "def test_ok(): pass", "python")
            .with_kind(FileKind::Test)
            .with_description("API tests")
            .with_dependencies(vec!["src/api.py".into()]);
        assert!(file.is_test());
        assert_eq!(file.dependencies, vec!["src/api.py".to_string()]);
        assert_eq!(file.line_count(), 1);
    }

    #[test]
    fn test_artifact_kind_matches() {
        let artifact = TaskArtifact::CodeFiles(vec![CodeFile::new("a.py", "x = 1", "python")]);
        assert_eq!(artifact.kind(), ArtifactKind::CodeFiles);
        assert!(artifact.as_code_files().is_some());
        assert!(artifact.as_requirements().is_none());
    }

    #[test]
    fn test_scan_text_concatenates_file_contents() {
        let artifact = TaskArtifact::CodeFiles(vec![
            CodeFile::new("a.py", "alpha = 1", "python"),
            CodeFile::new("b.py", "beta = 2", "python"),
        ]);
        let text = artifact.scan_text();
        assert!(text.contains("alpha = 1"));
        assert!(text.contains("beta = 2"));
    }

    #[test]
    fn test_deployment_bundle_emptiness() {
        let mut bundle = DeploymentBundle::default();
        assert!(bundle.is_empty());
        bundle.container_file = Some("FROM alpine".into());
        assert!(!bundle.is_empty());
    }

    #[test]
    fn test_artifact_serde_roundtrip() {
        let artifact = TaskArtifact::Text("hello".into());
        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: TaskArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn test_schema_hints_are_json_like() {
        for kind in [
            ArtifactKind::Requirements,
            ArtifactKind::Architecture,
            ArtifactKind::CodeFiles,
            ArtifactKind::TestReport,
            ArtifactKind::Deployment,
        ] {
            assert!(kind.schema_hint().contains(['{', '[']));
        }
    }
}
