//! Client for an external ANN server (Qdrant-style points API).
//!
//! Same semantics as [`crate::flat::FlatIndex`]; network failures surface
//! as `VectorIndexUnavailable` so callers can retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use engram_domain::error::{Error, Result};

use crate::{PointPayload, ScoredPoint, SearchFilters, VectorIndex};

pub struct RemoteIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    points: Vec<UpsertPoint<'a>>,
}

#[derive(Serialize)]
struct UpsertPoint<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: &'a PointPayload,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: serde_json::Value,
    score: f64,
}

impl RemoteIndex {
    pub fn new(base_url: &str, collection: &str, dimensions: usize) -> Result<RemoteIndex> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(RemoteIndex {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            dimensions,
        })
    }

    /// Create the collection if absent; dimension mismatches are the
    /// server's to reject.
    pub async fn ensure_collection(&self) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let body = json!({
            "vectors": { "size": self.dimensions, "distance": "Cosine" }
        });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        // 409 = already exists; both outcomes leave a usable collection.
        if !response.status().is_success() && response.status().as_u16() != 409 {
            return Err(Error::VectorIndexUnavailable(format!(
                "collection create returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn filter_json(filters: &SearchFilters) -> serde_json::Value {
        let mut must = Vec::new();
        if let Some(user_id) = &filters.user_id {
            must.push(json!({"key": "user_id", "match": {"value": user_id}}));
        }
        if let Some(agent_id) = &filters.agent_id {
            must.push(json!({"key": "agent_id", "match": {"value": agent_id}}));
        }
        if let Some(namespace) = &filters.namespace {
            must.push(json!({"key": "namespace", "match": {"value": namespace}}));
        }
        if let Some(kind) = filters.memory_type {
            must.push(json!({"key": "memory_type", "match": {"value": kind}}));
        }
        json!({ "must": must })
    }
}

fn unavailable(err: reqwest::Error) -> Error {
    Error::VectorIndexUnavailable(err.to_string())
}

#[async_trait]
impl VectorIndex for RemoteIndex {
    async fn insert(&self, id: &str, vector: Vec<f32>, payload: PointPayload) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::BadRequest(format!(
                "vector dimension {} does not match collection dimension {}",
                vector.len(),
                self.dimensions
            )));
        }
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection
        );
        let body = UpsertRequest {
            points: vec![UpsertPoint {
                id,
                vector: &vector,
                payload: &payload,
            }],
        };
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Error::VectorIndexUnavailable(format!(
                "upsert returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, self.collection
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({ "points": ids }))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Error::VectorIndexUnavailable(format!(
                "delete returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredPoint>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "filter": Self::filter_json(filters),
            "with_payload": false,
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(Error::VectorIndexUnavailable(format!(
                "search returned {}",
                response.status()
            )));
        }
        let parsed: SearchResponse = response.json().await.map_err(unavailable)?;
        Ok(parsed
            .result
            .into_iter()
            .map(|hit| ScoredPoint {
                id: match hit.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
                score: hit.score,
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_json_includes_only_set_fields() {
        let filters = SearchFilters {
            user_id: Some("u1".into()),
            namespace: Some("default".into()),
            ..Default::default()
        };
        let value = RemoteIndex::filter_json(&filters);
        let must = value["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["key"], "user_id");
    }

    #[tokio::test]
    async fn insert_rejects_dimension_mismatch_locally() {
        let index = RemoteIndex::new("http://127.0.0.1:1", "c", 4).unwrap();
        let err = index
            .insert("a", vec![0.0; 3], PointPayload::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
