//! Embedding provider port.
//!
//! Turns entity documents and retrieval queries into dense vectors for
//! similarity search.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;

/// A single embedding request item.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    /// Client-side correlation id
    pub id: String,
    /// Text to embed
    pub text: String,
}

/// A single embedding result.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    /// Matches the input id
    pub id: String,
    /// Embedding; empty when the provider has no index
    pub vector: Vec<f32>,
}

/// Source of dense text embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name ("openai", "null", ...).
    fn name(&self) -> &'static str;

    /// Model identifier stored alongside indexed vectors.
    fn model(&self) -> &str;

    /// Length of produced vectors; 0 for providers without an index.
    fn dimension(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>>;

    /// Embed many texts. Implementations chunk by [`max_batch_size`](Self::max_batch_size).
    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> DomainResult<Vec<EmbeddingOutput>>;

    /// Largest batch sent in one request.
    fn max_batch_size(&self) -> usize;
}
