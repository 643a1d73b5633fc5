//! Generative text service adapters.

pub mod anthropic;
pub mod mock;

pub use anthropic::AnthropicGenerativeService;
pub use mock::{MockGenerativeService, MockResponse};

use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::GenerativeConfig;
use crate::domain::ports::GenerativeTextService;

/// Build the service named by `config.provider`.
pub fn build_generative_service(config: &GenerativeConfig) -> DomainResult<Arc<dyn GenerativeTextService>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicGenerativeService::new(config.clone())?)),
        "mock" => Ok(Arc::new(MockGenerativeService::quiet())),
        other => Err(DomainError::Configuration(format!("Unknown generative provider: {other}"))),
    }
}
