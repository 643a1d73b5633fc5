//! Snapshot provider port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::UserStateSnapshot;

/// Builds the immutable state snapshot a pipeline run reasons over.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Returns [`DomainError::UserNotFound`](crate::domain::errors::DomainError::UserNotFound)
    /// for unknown users.
    async fn build_snapshot(&self, user_id: Uuid) -> DomainResult<UserStateSnapshot>;
}
