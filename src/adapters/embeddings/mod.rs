//! Embedding provider adapters.

pub mod openai;

pub use openai::OpenAiEmbeddingProvider;

use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::EmbeddingsConfig;
use crate::domain::ports::{EmbeddingProvider, NullEmbeddingProvider};

/// Build the provider named by `config.provider`.
pub fn build_embedding_provider(config: &EmbeddingsConfig) -> DomainResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbeddingProvider::new(config.clone())?)),
        "null" | "none" => Ok(Arc::new(NullEmbeddingProvider::new())),
        other => Err(DomainError::Configuration(format!("Unknown embeddings provider: {other}"))),
    }
}
