//! Entity document source port for the embedding pipeline.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::EntityKind;

/// Text representation of an entity, ready to embed.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDocument {
    pub user_id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    /// Text to embed
    pub text: String,
}

/// Loads the current text of an entity for indexing.
#[async_trait]
pub trait EntityDocumentSource: Send + Sync {
    /// `None` when the entity no longer exists.
    async fn load(&self, user_id: Uuid, entity_type: EntityKind, entity_id: Uuid) -> DomainResult<Option<EntityDocument>>;
}
