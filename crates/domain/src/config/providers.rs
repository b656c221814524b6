//! LLM, embedder and vector-index provider selection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai` (any OpenAI-compatible endpoint) or `mock`.
    pub provider: String,
    pub base_url: String,
    /// Name of the env var holding the API key; never the key itself.
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: "mock".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "ENGRAM_LLM_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// `openai` or `simple` (deterministic local hashing).
    pub provider: String,
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    /// Collection dimension; fixed at init and enforced by the index.
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        EmbedderConfig {
            provider: "simple".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "ENGRAM_EMBEDDER_API_KEY".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 256,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// `flat` (in-process) or `remote` (external ANN server).
    pub provider: String,
    pub url: String,
    pub collection_name: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        VectorConfig {
            provider: "flat".to_string(),
            url: "http://127.0.0.1:6333".to_string(),
            collection_name: "engram_memories".to_string(),
        }
    }
}
