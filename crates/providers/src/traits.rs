use engram_domain::error::Result;

/// Text-generation seam used by the distiller, conflict classifier, scene
/// summarizer and fact extractor.
#[async_trait::async_trait]
pub trait Llm: Send + Sync {
    /// Generate a completion for `prompt` and return the full text.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}

/// Embedding seam. Implementations must produce vectors of exactly
/// [`Embedder::dimensions`] — the vector index rejects anything else.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;
}
