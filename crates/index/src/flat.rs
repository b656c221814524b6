//! In-process flat cosine index with JSON snapshot persistence.
//!
//! Good for personal-scale corpora; exact search, no graph build. The
//! snapshot lives at `<dir>/<collection>.json` and is rewritten after
//! each mutation (the store is single-writer, so this stays cheap).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use engram_domain::error::{Error, Result};

use crate::{cosine_similarity, PointPayload, ScoredPoint, SearchFilters, VectorIndex};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Point {
    vector: Vec<f32>,
    payload: PointPayload,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    dimensions: usize,
    points: HashMap<String, Point>,
}

pub struct FlatIndex {
    path: Option<PathBuf>,
    dimensions: usize,
    points: RwLock<HashMap<String, Point>>,
}

impl FlatIndex {
    /// Open (or create) the collection snapshot under `dir`.
    pub fn open(dir: &Path, collection: &str, dimensions: usize) -> Result<FlatIndex> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{collection}.json"));
        let points = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw).unwrap_or_default();
            if snapshot.dimensions != 0 && snapshot.dimensions != dimensions {
                return Err(Error::BadRequest(format!(
                    "vector collection {collection} has dimension {}, embedder produces {dimensions}",
                    snapshot.dimensions
                )));
            }
            snapshot.points
        } else {
            HashMap::new()
        };
        tracing::info!(
            collection,
            dimensions,
            points = points.len(),
            "flat vector index ready"
        );
        Ok(FlatIndex {
            path: Some(path),
            dimensions,
            points: RwLock::new(points),
        })
    }

    /// Ephemeral index for tests.
    pub fn in_memory(dimensions: usize) -> FlatIndex {
        FlatIndex {
            path: None,
            dimensions,
            points: RwLock::new(HashMap::new()),
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            dimensions: self.dimensions,
            points: self.points.read().clone(),
        };
        let json = serde_json::to_string(&snapshot)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn insert(&self, id: &str, vector: Vec<f32>, payload: PointPayload) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::BadRequest(format!(
                "vector dimension {} does not match collection dimension {}",
                vector.len(),
                self.dimensions
            )));
        }
        self.points
            .write()
            .insert(id.to_string(), Point { vector, payload });
        self.persist()
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        {
            let mut points = self.points.write();
            for id in ids {
                points.remove(id);
            }
        }
        self.persist()
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredPoint>> {
        let points = self.points.read();
        let mut scored: Vec<ScoredPoint> = points
            .iter()
            .filter(|(_, point)| filters.matches(&point.payload))
            .map(|(id, point)| ScoredPoint {
                id: id.clone(),
                score: cosine_similarity(vector, &point.vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(user: &str) -> PointPayload {
        PointPayload {
            user_id: user.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ranks_by_descending_cosine() {
        let index = FlatIndex::in_memory(2);
        index.insert("a", vec![1.0, 0.0], payload("u1")).await.unwrap();
        index.insert("b", vec![0.7, 0.7], payload("u1")).await.unwrap();
        index.insert("c", vec![0.0, 1.0], payload("u1")).await.unwrap();

        let hits = index
            .search(&[1.0, 0.0], 2, &SearchFilters::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn filters_exclude_other_users() {
        let index = FlatIndex::in_memory(2);
        index.insert("a", vec![1.0, 0.0], payload("u1")).await.unwrap();
        index.insert("b", vec![1.0, 0.0], payload("u2")).await.unwrap();

        let hits = index
            .search(&[1.0, 0.0], 10, &SearchFilters::for_user("u2"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn rejects_dimension_mismatch() {
        let index = FlatIndex::in_memory(3);
        let err = index.insert("a", vec![1.0], payload("u1")).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = FlatIndex::open(dir.path(), "memories", 2).unwrap();
            index.insert("a", vec![1.0, 0.0], payload("u1")).await.unwrap();
        }
        let reopened = FlatIndex::open(dir.path(), "memories", 2).unwrap();
        let hits = reopened
            .search(&[1.0, 0.0], 1, &SearchFilters::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(hits[0].id, "a");

        // Dimension change is rejected on open.
        assert!(FlatIndex::open(dir.path(), "memories", 3).is_err());
    }

    #[tokio::test]
    async fn delete_removes_points() {
        let index = FlatIndex::in_memory(2);
        index.insert("a", vec![1.0, 0.0], payload("u1")).await.unwrap();
        index.delete(&["a".to_string()]).await.unwrap();
        let hits = index
            .search(&[1.0, 0.0], 10, &SearchFilters::for_user("u1"))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
