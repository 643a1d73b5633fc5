//! Vector store port used by the context retriever and the outbox pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::EntityKind;

/// A similarity query scoped to one user.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub user_id: Uuid,
    /// Query embedding
    pub vector: Vec<f32>,
    /// Maximum hits
    pub top_k: usize,
    /// Restrict hits to these kinds
    pub entity_types: Option<Vec<EntityKind>>,
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchResult {
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    /// Indexed text
    pub content: String,
    /// Cosine similarity in [-1, 1]
    pub similarity: f64,
}

/// An indexed entity document.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    pub user_id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    /// Text the vector was computed from
    pub content: String,
    pub vector: Vec<f32>,
    /// Embedding model that produced `vector`
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-user similarity index over entity documents.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top-K documents by descending similarity.
    async fn search(&self, query: &VectorQuery) -> DomainResult<Vec<VectorSearchResult>>;

    /// Insert or replace the document for its entity.
    async fn upsert(&self, document: &VectorDocument) -> DomainResult<()>;

    /// Returns whether a document was removed.
    async fn delete(&self, entity_type: EntityKind, entity_id: Uuid) -> DomainResult<bool>;
}
