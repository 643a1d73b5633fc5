//! OpenAI embedding provider adapter.
//!
//! Talks to the `/embeddings` endpoint of OpenAI or any compatible server
//! (Azure OpenAI, local inference servers).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::EmbeddingsConfig;
use crate::domain::ports::embedding::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};

const SERVICE: &str = "openai-embeddings";

/// Embedding provider for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbeddingProvider {
    config: EmbeddingsConfig,
    client: reqwest::Client,
}

impl OpenAiEmbeddingProvider {
    /// Build the HTTP client; the API key is resolved per request.
    pub fn new(config: EmbeddingsConfig) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn api_key(&self) -> DomainResult<String> {
        self.config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                DomainError::Configuration(
                    "OpenAI API key not set. Set OPENAI_API_KEY or embeddings.api_key.".to_string(),
                )
            })
    }

    async fn call_embeddings_api(&self, texts: Vec<String>) -> DomainResult<Vec<Vec<f32>>> {
        let expected = texts.len();
        let api_key = self.api_key()?;
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));

        let request_body = EmbeddingsRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DomainError::Timeout {
                        operation: "embedding request".to_string(),
                        elapsed_ms: self.config.timeout_secs * 1000,
                    }
                } else {
                    DomainError::external(SERVICE, format!("request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(DomainError::external(SERVICE, format!("returned {status}: {body}")));
        }

        let result: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| DomainError::SerializationError(format!("Failed to parse embedding response: {e}")))?;

        if result.data.len() != expected {
            return Err(DomainError::external(
                SERVICE,
                format!("expected {expected} embeddings, got {}", result.data.len()),
            ));
        }

        // Responses may arrive out of input order
        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>> {
        self.call_embeddings_api(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::external(SERVICE, "empty embedding response"))
    }

    async fn embed_batch(&self, inputs: &[EmbeddingInput]) -> DomainResult<Vec<EmbeddingOutput>> {
        let mut outputs = Vec::with_capacity(inputs.len());

        for chunk in inputs.chunks(self.config.max_batch_size.max(1)) {
            let texts = chunk.iter().map(|i| i.text.clone()).collect();
            let vectors = self.call_embeddings_api(texts).await?;
            outputs.extend(chunk.iter().zip(vectors).map(|(input, vector)| EmbeddingOutput {
                id: input.id.clone(),
                vector,
            }));
        }

        Ok(outputs)
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
