//! Adapter for any OpenAI-compatible endpoint (OpenAI, NVIDIA, Ollama's
//! compat surface, vLLM, …).
//!
//! Chat completions for generation, `/embeddings` for vectors. Timeouts
//! surface as `LlmTimeout` so the kernel can degrade gracefully.

use serde::{Deserialize, Serialize};

use engram_domain::config::{EmbedderConfig, LlmConfig};
use engram_domain::error::{Error, Result};

use crate::traits::{Embedder, Llm};

pub struct OpenAiCompatLlm {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiCompatLlm {
    pub fn from_config(config: &LlmConfig) -> Result<OpenAiCompatLlm> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env_var = %config.api_key_env,
                "no LLM API key configured; requests may be rejected by the provider"
            );
        }
        Ok(OpenAiCompatLlm {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait::async_trait]
impl Llm for OpenAiCompatLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(map_reqwest)?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "chat completion returned {}",
                response.status()
            )));
        }
        let parsed: ChatResponse = response.json().await.map_err(map_reqwest)?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    fn provider_id(&self) -> &str {
        "openai-compat"
    }
}

pub struct OpenAiCompatEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl OpenAiCompatEmbedder {
    pub fn from_config(config: &EmbedderConfig) -> Result<OpenAiCompatEmbedder> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(OpenAiCompatEmbedder {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiCompatEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingsRequest {
            model: &self.model,
            input: vec![text],
        };
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(map_reqwest)?;
        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "embeddings returned {}",
                response.status()
            )));
        }
        let parsed: EmbeddingsResponse = response.json().await.map_err(map_reqwest)?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| Error::Http("embeddings response had no rows".into()))?;
        if vector.len() != self.dimensions {
            return Err(Error::BadRequest(format!(
                "embedder returned {} dims, configured for {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn map_reqwest(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::LlmTimeout(err.to_string())
    } else {
        Error::Http(err.to_string())
    }
}
