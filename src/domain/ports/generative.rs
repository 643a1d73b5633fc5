//! Generative text service port.
//!
//! Completions are schema-constrained: the service is told the JSON schema
//! the answer must satisfy and returns the raw JSON text it produced.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::TokenUsage;

/// One schema-constrained completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Caller label for logs and mocks, e.g. "assessment" or "generation:habit"
    pub label: String,
    /// Role and rules for the model
    pub system_prompt: String,
    /// Stage input
    pub user_prompt: String,
    /// JSON schema the reply must satisfy
    pub schema: serde_json::Value,
    /// Output budget
    pub max_output_tokens: u32,
    /// Deadline for the call, retries included
    pub timeout: Duration,
}

/// Raw model reply.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// JSON text as produced
    pub content: String,
    /// Tokens billed, if reported
    pub usage: Option<TokenUsage>,
}

/// Model backend for the Tier 2 orchestrator.
#[async_trait]
pub trait GenerativeTextService: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Run one completion.
    async fn complete(&self, request: CompletionRequest) -> DomainResult<CompletionResponse>;
}
