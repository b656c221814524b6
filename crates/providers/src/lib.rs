//! LLM and embedder adapters behind the [`traits::Llm`] / [`traits::Embedder`]
//! seams, plus the config-driven factory.

pub mod openai_compat;
pub mod simple;
pub mod traits;

use std::sync::Arc;

use engram_domain::config::{EmbedderConfig, LlmConfig};
use engram_domain::error::{Error, Result};

pub use simple::{MockLlm, SimpleEmbedder};
pub use traits::{Embedder, Llm};

/// Build the configured LLM provider.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn Llm>> {
    match config.provider.trim().to_ascii_lowercase().as_str() {
        "openai" | "nvidia" | "ollama" => Ok(Arc::new(
            openai_compat::OpenAiCompatLlm::from_config(config)?,
        )),
        "mock" => Ok(Arc::new(MockLlm::new())),
        other => Err(Error::BadRequest(format!(
            "unknown LLM provider {other:?}; valid: openai, nvidia, ollama, mock"
        ))),
    }
}

/// Build the configured embedder.
pub fn create_embedder(config: &EmbedderConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.trim().to_ascii_lowercase().as_str() {
        "openai" | "nvidia" | "ollama" => Ok(Arc::new(
            openai_compat::OpenAiCompatEmbedder::from_config(config)?,
        )),
        "simple" => Ok(Arc::new(SimpleEmbedder::new(config.dimensions))),
        other => Err(Error::BadRequest(format!(
            "unknown embedder provider {other:?}; valid: openai, nvidia, ollama, simple"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_unknown_providers() {
        let mut llm = LlmConfig::default();
        llm.provider = "psychic".into();
        assert!(create_llm(&llm).is_err());

        let mut emb = EmbedderConfig::default();
        emb.provider = "psychic".into();
        assert!(create_embedder(&emb).is_err());
    }

    #[test]
    fn defaults_build_local_providers() {
        let llm = create_llm(&LlmConfig::default()).unwrap();
        assert_eq!(llm.provider_id(), "mock");
        let emb = create_embedder(&EmbedderConfig::default()).unwrap();
        assert_eq!(emb.dimensions(), 256);
    }
}
