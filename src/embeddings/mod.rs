// Embeddings module
// Turns question text into vectors; the cache only depends on the trait

pub mod ollama;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::Result;

pub use ollama::OllamaClient;

/// Maps text to a fixed-dimension vector.
///
/// Implementations must be deterministic for a given model and text, and must
/// report failures instead of returning an empty vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Name of the model producing the vectors
    fn model(&self) -> &str;
}
