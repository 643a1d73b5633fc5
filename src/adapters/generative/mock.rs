//! Scripted generative service for tests and offline runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TokenUsage;
use crate::domain::ports::{CompletionRequest, CompletionResponse, GenerativeTextService};

/// Scripted reply for one call label.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Reply text
    pub content: String,
    /// Fail the call instead of replying
    pub fail: bool,
    /// Message carried by the failure
    pub error_message: Option<String>,
    /// Simulated latency before replying
    pub delay: Option<Duration>,
}

impl MockResponse {
    /// Reply with `content`.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            fail: false,
            error_message: None,
            delay: None,
        }
    }

    /// Reply with a serialized JSON value.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::success(value.to_string())
    }

    /// Fail with `error`.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            fail: true,
            error_message: Some(error.into()),
            delay: None,
        }
    }

    /// Sleep for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Generative service answering from a table of scripted responses.
///
/// Responses are looked up by exact label first (`generation:habit`), then
/// by the label's stage prefix (`generation`). Unscripted labels fail.
#[derive(Clone, Default)]
pub struct MockGenerativeService {
    responses: Arc<RwLock<HashMap<String, MockResponse>>>,
    calls: Arc<RwLock<Vec<CompletionRequest>>>,
}

impl MockGenerativeService {
    /// Empty script; every call fails until responses are set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the reply for a label or stage prefix.
    pub async fn set_response(&self, label: impl Into<String>, response: MockResponse) {
        self.responses.write().await.insert(label.into(), response);
    }

    /// Builder-style variant of [`set_response`](Self::set_response) for setup code.
    pub fn with_response(self, label: impl Into<String>, response: MockResponse) -> Self {
        let label = label.into();
        // Fresh instance: the lock is uncontended
        if let Ok(mut responses) = self.responses.try_write() {
            responses.insert(label, response);
        }
        self
    }

    /// Canned responses that walk a run through all three stages without
    /// proposing interventions.
    pub fn quiet() -> Self {
        Self::new()
            .with_response(
                "assessment",
                MockResponse::json(&serde_json::json!({
                    "summary": "Steady week with no pressing risks.",
                    "risks": [],
                    "patterns": [],
                    "goal_progress": [],
                    "momentum": "steady",
                    "capacity_status": "balanced"
                })),
            )
            .with_response(
                "strategy",
                MockResponse::json(&serde_json::json!({
                    "focus": "maintain",
                    "max_recommendations": 0,
                    "interventions": []
                })),
            )
    }

    /// Every request received, in call order.
    pub async fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.read().await.clone()
    }

    /// Labels of every request received, in call order.
    pub async fn call_labels(&self) -> Vec<String> {
        self.calls.read().await.iter().map(|c| c.label.clone()).collect()
    }

    /// Calls whose label equals `label` or starts with `label:`.
    pub async fn call_count(&self, label: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.label == label || c.label.starts_with(&format!("{label}:")))
            .count()
    }

    async fn response_for(&self, label: &str) -> Option<MockResponse> {
        let responses = self.responses.read().await;
        responses.get(label).cloned().or_else(|| {
            let stage = label.split(':').next()?;
            responses.get(stage).cloned()
        })
    }
}

#[async_trait]
impl GenerativeTextService for MockGenerativeService {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> DomainResult<CompletionResponse> {
        let label = request.label.clone();
        self.calls.write().await.push(request);

        let response = self
            .response_for(&label)
            .await
            .ok_or_else(|| DomainError::external("mock", format!("no scripted response for {label}")))?;

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        if response.fail {
            return Err(DomainError::external(
                "mock",
                response.error_message.unwrap_or_else(|| "scripted failure".to_string()),
            ));
        }

        Ok(CompletionResponse {
            usage: Some(TokenUsage {
                input_tokens: 100,
                output_tokens: (response.content.len() / 4) as u32,
            }),
            content: response.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(label: &str) -> CompletionRequest {
        CompletionRequest {
            label: label.to_string(),
            system_prompt: String::new(),
            user_prompt: String::new(),
            schema: serde_json::json!({}),
            max_output_tokens: 100,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_exact_label_wins_over_stage_prefix() {
        let mock = MockGenerativeService::new()
            .with_response("generation", MockResponse::success("{\"candidates\": []}"))
            .with_response("generation:habit", MockResponse::failure("habit down"));

        assert!(mock.complete(request("generation:task")).await.is_ok());
        assert!(mock.complete(request("generation:habit")).await.is_err());
        assert_eq!(mock.call_count("generation").await, 2);
        assert_eq!(mock.call_count("assessment").await, 0);
    }

    #[tokio::test]
    async fn test_unscripted_label_fails() {
        let mock = MockGenerativeService::new();
        let err = mock.complete(request("strategy")).await.unwrap_err();
        assert!(matches!(err, DomainError::ExternalService { .. }));
        assert_eq!(mock.call_labels().await, vec!["strategy".to_string()]);
    }
}
