//! Anthropic Messages API generative adapter.
//!
//! Output is constrained by embedding the JSON schema in the system prompt
//! and prefilling the assistant turn with `{`. Requests are throttled with
//! a `governor` rate limiter and transient failures (429, 5xx, connection
//! errors) are retried with exponential backoff.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{GenerativeConfig, TokenUsage};
use crate::domain::ports::{CompletionRequest, CompletionResponse, GenerativeTextService};

const SERVICE: &str = "anthropic";

/// Message role in the Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: MessageRole,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

/// Prefilled assistant text; the model continues the JSON object.
const JSON_PREFILL: &str = "{";

/// Generative service backed by the Anthropic Messages API.
///
/// Requests are rate limited client-side and retried with exponential
/// backoff on transient failures.
pub struct AnthropicGenerativeService {
    config: GenerativeConfig,
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl AnthropicGenerativeService {
    /// Build the client and rate limiter from config.
    pub fn new(config: GenerativeConfig) -> DomainResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| DomainError::Configuration(format!("Failed to create HTTP client: {e}")))?;
        let per_second = NonZeroU32::new(config.requests_per_second)
            .ok_or_else(|| DomainError::Configuration("generative.requests_per_second must be > 0".to_string()))?;

        Ok(Self {
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
            config,
            client,
        })
    }

    fn api_key(&self) -> DomainResult<String> {
        self.config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| DomainError::Configuration("ANTHROPIC_API_KEY not set".to_string()))
    }

    fn build_request<'a>(&'a self, request: &CompletionRequest) -> MessagesRequest<'a> {
        let system = format!(
            "{}\n\nRespond with a single JSON object and nothing else. \
             It must validate against this JSON schema:\n{}",
            request.system_prompt, request.schema
        );

        MessagesRequest {
            model: &self.config.model,
            max_tokens: request.max_output_tokens,
            system,
            messages: vec![
                Message {
                    role: MessageRole::User,
                    content: vec![ContentBlock::Text {
                        text: request.user_prompt.clone(),
                    }],
                },
                Message {
                    role: MessageRole::Assistant,
                    content: vec![ContentBlock::Text {
                        text: JSON_PREFILL.to_string(),
                    }],
                },
            ],
            temperature: self.config.temperature,
        }
    }

    async fn send_once(&self, api_key: &str, body: &MessagesRequest<'_>, timeout: Duration) -> Result<MessagesResponse, backoff::Error<DomainError>> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url.trim_end_matches('/')))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.config.api_version)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let err = if e.is_timeout() {
                    DomainError::Timeout {
                        operation: "anthropic messages request".to_string(),
                        elapsed_ms: timeout.as_millis() as u64,
                    }
                } else {
                    DomainError::external(SERVICE, format!("request failed: {e}"))
                };
                // Connection-level failures are worth another attempt
                if e.is_connect() || e.is_timeout() || e.is_request() {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = DomainError::external(SERVICE, format!("API error {status}: {body}"));
            return Err(if is_retryable_status(status) {
                tracing::warn!(%status, "Transient generative API error, retrying");
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        response.json::<MessagesResponse>().await.map_err(|e| {
            backoff::Error::permanent(DomainError::SerializationError(format!("Failed to parse response: {e}")))
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() || status.as_u16() == 529
}

#[async_trait]
impl GenerativeTextService for AnthropicGenerativeService {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: CompletionRequest) -> DomainResult<CompletionResponse> {
        let api_key = self.api_key()?;
        let body = self.build_request(&request);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(Duration::from_secs(self.config.max_retry_elapsed_secs)))
            .build();

        let response =
            backoff::future::retry(policy, || self.send_once(&api_key, &body, request.timeout)).await?;

        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(label = %request.label, "Generative response truncated at max_tokens");
        }

        let text: String = response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect();

        // An empty continuation is an empty response, not "{"
        let content = if text.trim().is_empty() {
            String::new()
        } else {
            format!("{JSON_PREFILL}{text}")
        };

        Ok(CompletionResponse {
            content,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }
}
