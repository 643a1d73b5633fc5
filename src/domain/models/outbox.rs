//! Outbox domain model.
//!
//! The outbox captures entity changes so the embedding pipeline can keep
//! the vector index fresh. Entries share the lease mechanics of the signal
//! queue and are archived once processed and past the retention window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signal::QueueStatus;
use super::snapshot::EntityKind;

/// Kind of change recorded for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxOperation {
    Created,
    Updated,
    Deleted,
}

impl OutboxOperation {
    /// Stable name stored in the `operation` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    /// Parse a stored operation name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Whether processing this operation removes the entity from the index.
    pub fn removes_from_index(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// A captured entity change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Monotonic queue id
    pub id: i64,
    pub user_id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    /// Latest change recorded for the entity
    pub operation: OutboxOperation,
    pub status: QueueStatus,
    pub lease_holder: Option<String>,
    /// When the current lease lapses
    pub lease_until: Option<DateTime<Utc>>,
    /// Failed processing attempts so far
    pub retry_count: u32,
    /// Times a lapsed lease was reclaimed
    pub reclaim_count: u32,
    /// Error from the latest failed attempt
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// An entity change ready to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEntry {
    pub user_id: Uuid,
    pub entity_type: EntityKind,
    pub entity_id: Uuid,
    pub operation: OutboxOperation,
    pub created_at: DateTime<Utc>,
}

impl NewOutboxEntry {
    /// Change captured now.
    pub fn new(user_id: Uuid, entity_type: EntityKind, entity_id: Uuid, operation: OutboxOperation) -> Self {
        Self {
            user_id,
            entity_type,
            entity_id,
            operation,
            created_at: Utc::now(),
        }
    }
}
