//! Wiring shared by the commands: config, database and service construction.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::adapters::embeddings::build_embedding_provider;
use crate::adapters::generative::{build_generative_service, MockGenerativeService};
use crate::adapters::snapshot::JsonDirSnapshotProvider;
use crate::adapters::sqlite::{
    initialize_database, SqliteAssessmentHistory, SqliteOutboxQueue, SqliteSignalQueue, SqliteVectorStore,
};
use crate::domain::models::Config;
use crate::domain::ports::GenerativeTextService;
use crate::services::{EscalationPipeline, PipelineServices, SignalClassificationRegistry, SignalIntake};

/// Shared state for CLI commands: loaded config plus an open pool.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
}

impl AppContext {
    /// Open (and migrate) the configured database.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = initialize_database(&config.database)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        Ok(Self { config, pool })
    }

    /// Signal queue over the shared pool.
    pub fn signal_queue(&self) -> Arc<SqliteSignalQueue> {
        Arc::new(SqliteSignalQueue::new(self.pool.clone()))
    }

    /// Outbox queue over the shared pool.
    pub fn outbox_queue(&self) -> Arc<SqliteOutboxQueue> {
        Arc::new(SqliteOutboxQueue::new(self.pool.clone()))
    }

    /// Vector store over the shared pool.
    pub fn vector_store(&self) -> Arc<SqliteVectorStore> {
        Arc::new(SqliteVectorStore::new(self.pool.clone()))
    }

    /// Snapshot provider for the configured directory.
    pub fn snapshots(&self) -> JsonDirSnapshotProvider {
        JsonDirSnapshotProvider::new(self.config.snapshots.directory.clone())
    }

    /// Intake using the standard classifications and configured TTLs.
    pub fn signal_intake(&self) -> SignalIntake {
        let registry = SignalClassificationRegistry::standard();
        for unmapped in registry.validate() {
            tracing::warn!(event_type = unmapped.as_str(), "Event type has no classification, using fallback");
        }
        SignalIntake::new(self.signal_queue(), Arc::new(registry), self.config.queue.ttl.clone())
    }

    /// Build the pipeline; `mock` swaps in the offline generative service.
    pub fn pipeline(&self, mock: bool) -> Result<EscalationPipeline> {
        let generative: Arc<dyn GenerativeTextService> = if mock {
            Arc::new(MockGenerativeService::quiet())
        } else {
            build_generative_service(&self.config.generative).context("Failed to build generative service")?
        };
        let embeddings =
            build_embedding_provider(&self.config.embeddings).context("Failed to build embedding provider")?;

        let services = PipelineServices {
            snapshots: Arc::new(self.snapshots()),
            embeddings,
            vectors: self.vector_store(),
            generative,
            history: Arc::new(SqliteAssessmentHistory::new(self.pool.clone())),
        };
        Ok(EscalationPipeline::new(services, &self.config))
    }
}
