//! Port trait definitions (hexagonal architecture).
//!
//! Adapters implement these traits; services depend only on them:
//! - SignalQueue / OutboxQueue: leased work queues
//! - SnapshotProvider / EntityDocumentSource: user state reads
//! - EmbeddingProvider / VectorStore: semantic retrieval
//! - GenerativeTextService: schema-constrained completions
//! - AssessmentHistoryRepository: run audit trail and delta baseline

pub mod assessment_history;
pub mod embedding;
pub mod entity_documents;
pub mod generative;
pub mod null_embedding;
pub mod outbox_queue;
pub mod signal_queue;
pub mod snapshot_provider;
pub mod vector_store;

pub use assessment_history::{AssessmentHistoryRepository, AssessmentRecord, Tier};
pub use embedding::{EmbeddingInput, EmbeddingOutput, EmbeddingProvider};
pub use entity_documents::{EntityDocument, EntityDocumentSource};
pub use generative::{CompletionRequest, CompletionResponse, GenerativeTextService};
pub use null_embedding::NullEmbeddingProvider;
pub use outbox_queue::OutboxQueue;
pub use signal_queue::SignalQueue;
pub use snapshot_provider::SnapshotProvider;
pub use vector_store::{VectorDocument, VectorQuery, VectorSearchResult, VectorStore};
