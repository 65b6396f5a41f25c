//! Embedding-backed associative store
//!
//! Recall scores compose semantic similarity, recency (exponential decay
//! with a configurable half-life), and importance (explicit via metadata or
//! inferred on write). The store is partitioned by scope; a per-scope lock
//! makes every write visible to subsequent recalls in the same scope.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::llm::Embedder;

const SIMILARITY_WEIGHT: f64 = 0.6;
const RECENCY_WEIGHT: f64 = 0.25;
const IMPORTANCE_WEIGHT: f64 = 0.15;
const DEFAULT_HALF_LIFE: Duration = Duration::from_secs(3600);

/// One remembered entry
#[derive(Debug, Clone)]
struct MemoryRecord {
    id: Uuid,
    content: String,
    metadata: BTreeMap<String, String>,
    embedding: Vec<f32>,
    importance: f64,
    created_at: DateTime<Utc>,
}

/// A recall hit with its composite score
#[derive(Debug, Clone, PartialEq)]
pub struct Recalled {
    pub content: String,
    pub score: f64,
}

/// Cosine similarity between two vectors; zero if either is degenerate
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// Importance is explicit via metadata["importance"], otherwise inferred
// from content signals.
fn importance_of(content: &str, metadata: &BTreeMap<String, String>) -> f64 {
    if let Some(explicit) = metadata.get("importance").and_then(|v| v.parse::<f64>().ok()) {
        return explicit.clamp(0.0, 1.0);
    }
    let lower = content.to_lowercase();
    let mut score: f64 = 0.4;
    for signal in ["error", "decision", "fix", "constraint", "blocked"] {
        if lower.contains(signal) {
            score += 0.15;
        }
    }
    score.clamp(0.0, 1.0)
}

type ScopeStore = Arc<Mutex<Vec<MemoryRecord>>>;

/// Session-scoped associative memory
pub struct AssociativeMemory {
    embedder: Arc<dyn Embedder>,
    half_life: Duration,
    scopes: RwLock<HashMap<String, ScopeStore>>,
}

impl AssociativeMemory {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            half_life: DEFAULT_HALF_LIFE,
            scopes: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_half_life(mut self, half_life: Duration) -> Self {
        self.half_life = half_life;
        self
    }

    fn scope_store(&self, scope: &str) -> ScopeStore {
        {
            let scopes = self.scopes.read().expect("scope map poisoned");
            if let Some(store) = scopes.get(scope) {
                return store.clone();
            }
        }
        let mut scopes = self.scopes.write().expect("scope map poisoned");
        scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Store content under a scope. Embedder failures degrade to a no-op
    /// for this call.
    pub async fn remember(
        &self,
        scope: &str,
        content: String,
        metadata: BTreeMap<String, String>,
    ) {
        let embedding = match self.embedder.embed(&content).await {
            Ok(vector) => vector,
            Err(error) => {
                tracing::warn!(scope, %error, "embedding failed; dropping memory write");
                return;
            }
        };
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            importance: importance_of(&content, &metadata),
            content,
            metadata,
            embedding,
            created_at: Utc::now(),
        };
        let store = self.scope_store(scope);
        let mut records = store.lock().await;
        tracing::debug!(scope, id = %record.id, "memory write");
        records.push(record);
    }

    /// Recall the `k` highest-scoring entries for the query.
    ///
    /// Taking the scope lock orders this recall after every preceding write
    /// in the same scope.
    pub async fn recall(&self, scope: &str, query: &str, k: usize) -> Vec<Recalled> {
        if k == 0 {
            return Vec::new();
        }
        let query_embedding = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(error) => {
                tracing::warn!(scope, %error, "embedding failed; recall degraded to empty");
                return Vec::new();
            }
        };
        let store = self.scope_store(scope);
        let records = store.lock().await;
        let now = Utc::now();
        let half_life_secs = self.half_life.as_secs_f64().max(1.0);

        let mut scored: Vec<Recalled> = records
            .iter()
            .map(|record| {
                let similarity = cosine_similarity(&query_embedding, &record.embedding);
                let age_secs = (now - record.created_at).num_milliseconds().max(0) as f64 / 1000.0;
                let recency = 0.5f64.powf(age_secs / half_life_secs);
                let score = SIMILARITY_WEIGHT * similarity
                    + RECENCY_WEIGHT * recency
                    + IMPORTANCE_WEIGHT * record.importance;
                Recalled {
                    content: record.content.clone(),
                    score,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    /// Number of records currently held in a scope
    pub async fn len(&self, scope: &str) -> usize {
        let store = self.scope_store(scope);
        let len = store.lock().await.len();
        len
    }

    /// Drop all scopes belonging to the project
    pub async fn purge_project(&self, project_id: &Uuid) {
        let prefix = format!("{project_id}/");
        let mut scopes = self.scopes.write().expect("scope map poisoned");
        let before = scopes.len();
        scopes.retain(|scope, _| !scope.starts_with(&prefix) && scope != &project_id.to_string());
        tracing::debug!(
            project_id = %project_id,
            purged = before - scopes.len(),
            "memory scopes purged"
        );
    }
}

impl std::fmt::Debug for AssociativeMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.scopes.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("AssociativeMemory")
            .field("scopes", &count)
            .field("half_life", &self.half_life)
            .finish()
    }
}
