//! Snapshot persistence and crash-resume
//!
//! Layout, one directory per project id:
//!
//! ```text
//! <root>/<project_id>/
//!     state.json            last full snapshot (atomic replace)
//!     transitions.log       append-only JSON lines
//!     errors.log            append-only JSON lines
//!     failure_report.json   written on terminal error
//!     workspace/            generated files
//! ```
//!
//! A restart loads `state.json` and resumes from the last committed phase
//! boundary; the logs survive even if a snapshot write was interrupted.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::guardrail::Verdict;
use crate::state::{ErrorRecord, PhaseTransition, ProjectState};

/// Filesystem store for run state
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    /// Create a store rooted at the given directory (created on demand)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a specific project
    pub fn project_dir(&self, project_id: &Uuid) -> PathBuf {
        self.root.join(project_id.to_string())
    }

    /// Workspace subtree where generated files are materialized
    pub fn workspace_dir(&self, project_id: &Uuid) -> PathBuf {
        self.project_dir(project_id).join("workspace")
    }

    /// Ensure the project directory and workspace exist
    pub fn prepare(&self, project_id: &Uuid) -> Result<PathBuf> {
        let dir = self.project_dir(project_id);
        fs::create_dir_all(self.workspace_dir(project_id))?;
        Ok(dir)
    }

    /// Write a full snapshot atomically (write-then-rename)
    pub fn save_snapshot(&self, state: &ProjectState) -> Result<()> {
        let dir = self.prepare(&state.project_id)?;
        let tmp = dir.join("state.json.tmp");
        let target = dir.join("state.json");
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &target)?;
        tracing::debug!(project_id = %state.project_id, path = %target.display(), "snapshot saved");
        Ok(())
    }

    /// Append a transition to the transitions log
    pub fn append_transition(&self, project_id: &Uuid, transition: &PhaseTransition) -> Result<()> {
        self.append_line(project_id, "transitions.log", transition)
    }

    /// Append an error record to the errors log
    pub fn append_error(&self, project_id: &Uuid, record: &ErrorRecord) -> Result<()> {
        self.append_line(project_id, "errors.log", record)
    }

    fn append_line<T: Serialize>(&self, project_id: &Uuid, file: &str, value: &T) -> Result<()> {
        let dir = self.prepare(project_id)?;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(file))?;
        let line = serde_json::to_string(value)?;
        writeln!(handle, "{line}")?;
        Ok(())
    }

    /// Load the last snapshot for a project
    pub fn load(&self, project_id: &Uuid) -> Result<ProjectState> {
        let path = self.project_dir(project_id).join("state.json");
        if !path.exists() {
            return Err(Error::Config(format!(
                "no snapshot found for project {project_id} at {}",
                path.display()
            )));
        }
        let json = fs::read_to_string(&path)?;
        let state: ProjectState = serde_json::from_str(&json)?;
        Ok(state)
    }

    /// Read the transitions log back as records (tolerates a trailing
    /// partial line from an interrupted write)
    pub fn read_transitions(&self, project_id: &Uuid) -> Result<Vec<PhaseTransition>> {
        self.read_lines(project_id, "transitions.log")
    }

    /// Read the errors log back as records
    pub fn read_errors(&self, project_id: &Uuid) -> Result<Vec<ErrorRecord>> {
        self.read_lines(project_id, "errors.log")
    }

    fn read_lines<T: for<'de> Deserialize<'de>>(
        &self,
        project_id: &Uuid,
        file: &str,
    ) -> Result<Vec<T>> {
        let path = self.project_dir(project_id).join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)?;
        let mut out = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(value) => out.push(value),
                Err(e) => {
                    tracing::warn!(file, error = %e, "skipping malformed log line");
                }
            }
        }
        Ok(out)
    }

    /// Write the structured failure report next to the snapshot
    pub fn write_failure_report(&self, report: &FailureReport) -> Result<PathBuf> {
        let dir = self.prepare(&report.project_id)?;
        let path = dir.join("failure_report.json");
        fs::write(&path, serde_json::to_string_pretty(report)?)?;
        tracing::info!(project_id = %report.project_id, path = %path.display(), "failure report written");
        Ok(path)
    }

    /// List project ids that have snapshots under this store
    pub fn list_projects(&self) -> Result<Vec<Uuid>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Ok(id) = entry.file_name().to_string_lossy().parse::<Uuid>() {
                if entry.path().join("state.json").exists() {
                    out.push(id);
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Structured report written when a run terminates in the error phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub project_id: Uuid,
    /// Phase the run failed in
    pub phase: String,
    /// All errors recorded during the run
    pub errors: Vec<ErrorRecord>,
    /// Last guardrail verdicts observed before the failure
    #[serde(default)]
    pub last_verdicts: Vec<Verdict>,
    /// Raw text of the worker output that triggered the failure, if any
    #[serde(default)]
    pub last_output: Option<String>,
    /// Per-phase retry counts at the time of failure
    #[serde(default)]
    pub retries: std::collections::BTreeMap<String, u32>,
}
