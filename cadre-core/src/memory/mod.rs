//! Memory: session-scoped associative recall plus the cross-session
//! relational metrics sink
//!
//! The memory layer is optional. A disabled handle turns `remember` into a
//! no-op and `recall` into an empty result; the flow stays correct, just
//! less context-efficient.

pub mod associative;
pub mod relational;

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

pub use associative::{cosine_similarity, AssociativeMemory, Recalled};
pub use relational::{MetricsSink, NullMetrics, RelationalMetrics};

/// Scope path partitioning memory by project and area
pub fn scope_path(project_id: &Uuid, area: &str) -> String {
    format!("{project_id}/{area}")
}

/// Cheap-to-clone handle to the associative store; `None` means disabled
#[derive(Clone, Default)]
pub struct MemoryHandle {
    inner: Option<Arc<AssociativeMemory>>,
}

impl MemoryHandle {
    /// A handle with memory disabled
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(memory: Arc<AssociativeMemory>) -> Self {
        Self {
            inner: Some(memory),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Store content under a scope; no-op when disabled
    pub async fn remember(
        &self,
        scope: &str,
        content: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) {
        if let Some(ref memory) = self.inner {
            memory.remember(scope, content.into(), metadata).await;
        }
    }

    /// Recall the `k` most relevant entries; empty when disabled
    pub async fn recall(&self, scope: &str, query: &str, k: usize) -> Vec<Recalled> {
        match self.inner {
            Some(ref memory) => memory.recall(scope, query, k).await,
            None => Vec::new(),
        }
    }

    /// Drop all scopes belonging to a project; called on run completion
    pub async fn purge_project(&self, project_id: &Uuid) {
        if let Some(ref memory) = self.inner {
            memory.purge_project(project_id).await;
        }
    }
}

impl std::fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_handle_is_inert() {
        let handle = MemoryHandle::disabled();
        assert!(!handle.is_enabled());
        handle
            .remember("p/planning", "something", BTreeMap::new())
            .await;
        let recalled = handle.recall("p/planning", "something", 5).await;
        assert!(recalled.is_empty());
    }

    #[test]
    fn test_scope_path_format() {
        let id = Uuid::nil();
        assert_eq!(
            scope_path(&id, "planning"),
            format!("{id}/planning")
        );
    }
}
