//! Approximate-nearest-neighbor index over memory embeddings.
//!
//! Two interchangeable implementations behind one trait: an in-process
//! flat cosine index persisted as a JSON snapshot, and a client for an
//! external ANN server. Both answer `search(vector, top_k, filters)` with
//! `(id, score)` pairs sorted by descending cosine similarity.

pub mod flat;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use engram_domain::error::Result;
use engram_domain::memory::MemoryType;

/// Structured payload stored next to each vector; all filterable fields.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PointPayload {
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub memory_type: Option<MemoryType>,
}

/// Equality filters applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub namespace: Option<String>,
    pub memory_type: Option<MemoryType>,
}

impl SearchFilters {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        SearchFilters {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, payload: &PointPayload) -> bool {
        if let Some(user_id) = &self.user_id {
            if &payload.user_id != user_id {
                return false;
            }
        }
        if let Some(agent_id) = &self.agent_id {
            if payload.agent_id.as_deref() != Some(agent_id.as_str()) {
                return false;
            }
        }
        if let Some(namespace) = &self.namespace {
            if payload.namespace.as_deref() != Some(namespace.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.memory_type {
            if payload.memory_type != Some(kind) {
                return false;
            }
        }
        true
    }
}

/// One search hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f64,
}

/// The index seam. Collection dimension is fixed at init and must match
/// the configured embedder.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, id: &str, vector: Vec<f32>, payload: PointPayload) -> Result<()>;

    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredPoint>>;

    fn dimensions(&self) -> usize;
}

/// Cosine similarity of two equal-length vectors; 0.0 when either norm
/// vanishes or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        // Degenerate inputs never panic.
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn filters_match_payloads() {
        let payload = PointPayload {
            user_id: "u1".into(),
            agent_id: Some("a1".into()),
            namespace: Some("default".into()),
            memory_type: Some(MemoryType::Episodic),
        };
        assert!(SearchFilters::for_user("u1").matches(&payload));
        assert!(!SearchFilters::for_user("u2").matches(&payload));

        let filters = SearchFilters {
            user_id: Some("u1".into()),
            memory_type: Some(MemoryType::Semantic),
            ..Default::default()
        };
        assert!(!filters.matches(&payload));
    }
}
