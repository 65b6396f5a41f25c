//! Tasks and their dependency DAG

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::guardrail::GuardrailChain;
use crate::model::ArtifactKind;

const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_TASK_RETRIES: u32 = 3;

/// A unit of work a crew dispatches to one worker role
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Worker role that executes this task
    pub role: String,
    pub expected: ArtifactKind,
    /// Ids of tasks whose outputs are inlined into this task's context
    pub depends_on: Vec<String>,
    pub guardrails: GuardrailChain,
    pub timeout: Duration,
    /// Guardrail/shape retry budget for this task
    pub max_retries: u32,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        role: impl Into<String>,
        expected: ArtifactKind,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role: role.into(),
            expected,
            depends_on: Vec::new(),
            guardrails: GuardrailChain::new(),
            timeout: DEFAULT_TASK_TIMEOUT,
            max_retries: DEFAULT_TASK_RETRIES,
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailChain) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether every dependency is present in the committed set
    pub fn is_ready(&self, committed: &HashSet<String>) -> bool {
        self.depends_on.iter().all(|dep| committed.contains(dep))
    }
}

/// Validate the task list as a DAG and return indices in topological order.
///
/// Rejects duplicate ids, unknown dependencies, and cycles; all are
/// programmer errors in crew construction.
pub fn topological_order(tasks: &[Task]) -> Result<Vec<usize>> {
    let mut index_of = HashMap::new();
    for (i, task) in tasks.iter().enumerate() {
        if index_of.insert(task.id.as_str(), i).is_some() {
            return Err(Error::Invariant(format!("duplicate task id: {}", task.id)));
        }
    }

    let mut in_degree = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    for (i, task) in tasks.iter().enumerate() {
        for dep in &task.depends_on {
            let Some(&dep_idx) = index_of.get(dep.as_str()) else {
                return Err(Error::Invariant(format!(
                    "task '{}' depends on unknown task '{dep}'",
                    task.id
                )));
            };
            in_degree[i] += 1;
            dependents[dep_idx].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != tasks.len() {
        let stuck: Vec<&str> = (0..tasks.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| tasks[i].id.as_str())
            .collect();
        return Err(Error::Invariant(format!(
            "dependency cycle among tasks: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(id, format!("do {id}"), "dev", ArtifactKind::Text)
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[test]
    fn test_linear_order() {
        let tasks = vec![task("c", &["b"]), task("a", &[]), task("b", &["a"])];
        let order = topological_order(&tasks).unwrap();
        let ids: Vec<&str> = order.iter().map(|&i| tasks[i].id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_independent_tasks_all_present() {
        let tasks = vec![task("x", &[]), task("y", &[]), task("z", &[])];
        let order = topological_order(&tasks).unwrap();
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        let err = topological_order(&tasks).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let tasks = vec![task("a", &["ghost"])];
        let err = topological_order(&tasks).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_cycle_rejected() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        let err = topological_order(&tasks).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_readiness_tracks_committed_set() {
        let t = task("b", &["a"]);
        let mut committed = HashSet::new();
        assert!(!t.is_ready(&committed));
        committed.insert("a".to_string());
        assert!(t.is_ready(&committed));
    }
}
