//! Domain errors for the Lodestar escalation pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the Lodestar system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("Queue entry not found: {0}")]
    QueueEntryNotFound(i64),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("External service error ({service}): {message}")]
    ExternalService { service: String, message: String },

    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DomainError {
    /// Shorthand for an [`DomainError::ExternalService`] failure.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::ExternalService { .. } | Self::Timeout { .. }
        )
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
