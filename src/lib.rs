//! Lodestar - tiered signal escalation for life-management coaching
//!
//! Domain events become prioritized signals on a durable queue. Workers lease
//! signals per user and escalate through three tiers, stopping at the
//! cheapest tier that can answer:
//!
//! - **Tier 0** deterministic rules over the user's state snapshot
//! - **Tier 1** a quick assessment combining retrieval relevance, state
//!   change and urgency into an escalation decision
//! - **Tier 2** a staged generative pipeline (assessment, strategy,
//!   per-domain generation) whose candidates are validated against the
//!   snapshot before they are returned
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, ports and errors
//! - **Service Layer** (`services`): the tiers, the pipeline and the workers
//! - **Adapters** (`adapters`): SQLite, embeddings, generative APIs, snapshots
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): the `lodestar` command

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, RecommendationCandidate, SignalEntry, SignalEventType, SignalPriority, UserStateSnapshot, WindowType,
};
pub use domain::ports::{
    EmbeddingProvider, GenerativeTextService, OutboxQueue, SignalQueue, SnapshotProvider, VectorStore,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{EscalationPipeline, PipelineOutcome, SignalWorker};
