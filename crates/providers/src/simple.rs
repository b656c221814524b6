//! Deterministic local providers: a hashed bag-of-words embedder and a
//! canned-response mock LLM.
//!
//! The simple embedder needs no model or network: each lowercased token
//! hashes to a bucket, bucket counts form the vector, and the vector is
//! L2-normalized. Texts sharing tokens land near each other, which is
//! enough for offline mode and for every deterministic test in the
//! workspace.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use engram_domain::error::Result;

use crate::traits::{Embedder, Llm};

pub struct SimpleEmbedder {
    dimensions: usize,
}

impl SimpleEmbedder {
    pub fn new(dimensions: usize) -> SimpleEmbedder {
        SimpleEmbedder {
            dimensions: dimensions.max(8),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut value = 0usize;
        for byte in &digest[..8] {
            value = (value << 8) | (*byte as usize);
        }
        value % self.dimensions
    }
}

#[async_trait::async_trait]
impl Embedder for SimpleEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(token)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Mock LLM with a FIFO queue of canned responses; repeats the last one
/// when the queue runs dry, and echoes an empty JSON object by default.
pub struct MockLlm {
    responses: Mutex<Vec<String>>,
    fallback: String,
}

impl MockLlm {
    pub fn new() -> MockLlm {
        MockLlm {
            responses: Mutex::new(Vec::new()),
            fallback: "{}".to_string(),
        }
    }

    pub fn with_responses(responses: Vec<String>) -> MockLlm {
        MockLlm {
            responses: Mutex::new(responses),
            fallback: "{}".to_string(),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().push(response.into());
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        MockLlm::new()
    }
}

#[async_trait::async_trait]
impl Llm for MockLlm {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            Ok(self.fallback.clone())
        } else if responses.len() == 1 {
            Ok(responses[0].clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic_and_normalized() {
        let embedder = SimpleEmbedder::new(64);
        let a = embedder.embed("project codename atlas").await.unwrap();
        let b = embedder.embed("project codename atlas").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_tokens_raise_similarity() {
        let embedder = SimpleEmbedder::new(128);
        let base = embedder.embed("the project codename is atlas").await.unwrap();
        let related = embedder.embed("atlas codename").await.unwrap();
        let unrelated = embedder.embed("grocery list bananas").await.unwrap();

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        assert!(dot(&base, &related) > dot(&base, &unrelated));
    }

    #[tokio::test]
    async fn mock_llm_drains_queue_then_repeats() {
        let llm = MockLlm::with_responses(vec!["one".into(), "two".into()]);
        assert_eq!(llm.generate("x").await.unwrap(), "one");
        assert_eq!(llm.generate("x").await.unwrap(), "two");
        assert_eq!(llm.generate("x").await.unwrap(), "two");
    }
}
