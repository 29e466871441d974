//! Text-to-vector embedding collaborator.
//!
//! Provides the [`EmbeddingProvider`] trait and an OpenAI-compatible HTTP implementation.
//! The provider is created via [`create_provider`] from configuration.

pub mod http;

use anyhow::Result;

/// Trait for embedding text into vectors.
///
/// Implementations produce vectors of exactly [`EmbeddingProvider::dimensions`] entries.
/// All methods are synchronous — callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched requests.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Model identifier, recorded so a model change can be detected.
    fn model(&self) -> &str;
}

/// Create an embedding provider from config.
///
/// `"openai"` (alias `"http"`) talks to any OpenAI-compatible `/embeddings` endpoint.
pub fn create_provider(
    config: &crate::config::EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" | "http" => {
            let provider = http::HttpEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: openai"),
    }
}
