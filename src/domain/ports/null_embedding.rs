//! Embedding provider for deployments without a semantic index.
//!
//! Every vector is empty. The context retriever treats an empty query
//! vector as "no context" and the outbox processor skips indexing.

use async_trait::async_trait;

use super::embedding::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};
use crate::domain::errors::DomainResult;

/// Provider that never produces a vector.
#[derive(Debug, Clone, Default)]
pub struct NullEmbeddingProvider;

impl NullEmbeddingProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    fn name(&self) -> &'static str {
        "null"
    }

    fn model(&self) -> &str {
        "none"
    }

    fn dimension(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> DomainResult<Vec<f32>> {
        Ok(Vec::new())
    }

    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> DomainResult<Vec<EmbeddingOutput>> {
        Ok(inputs
            .iter()
            .map(|input| EmbeddingOutput {
                id: input.id.clone(),
                vector: Vec::new(),
            })
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        usize::MAX
    }
}
