//! Outbox embedding processor.
//!
//! Keeps the vector index in step with entity changes. Created and updated
//! entities are rendered, embedded in one batch and upserted; deleted or
//! vanished entities are removed from the index.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::domain::errors::DomainResult;
use crate::domain::models::{OutboxConfig, OutboxEntry};
use crate::domain::ports::{
    EmbeddingInput, EmbeddingProvider, EntityDocument, EntityDocumentSource, OutboxQueue,
    VectorDocument, VectorStore,
};

/// Outbox worker settings.
#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    pub worker_id: String,
    pub lease_duration: chrono::Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub poll_interval: Duration,
}

impl OutboxProcessorConfig {
    /// Settings from the `outbox` section under `worker_id`.
    pub fn from_config(config: &OutboxConfig, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            lease_duration: config.lease_duration(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// What one outbox batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct OutboxReport {
    pub acquired: usize,
    pub indexed: u64,
    pub removed: u64,
    /// Processed without indexing (provider returned no vector)
    pub unindexed: u64,
    /// Failed attempts left for a retry
    pub failed: u64,
    pub abandoned: u64,
}

/// Keeps the vector index in step with entity changes recorded in the outbox.
pub struct OutboxProcessor {
    queue: Arc<dyn OutboxQueue>,
    documents: Arc<dyn EntityDocumentSource>,
    embeddings: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    config: OutboxProcessorConfig,
    stop_flag: Arc<AtomicBool>,
}

impl OutboxProcessor {
    pub fn new(
        queue: Arc<dyn OutboxQueue>,
        documents: Arc<dyn EntityDocumentSource>,
        embeddings: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            queue,
            documents,
            embeddings,
            vectors,
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop after the current batch.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    /// Poll until stopped, sleeping after idle or failed batches.
    pub async fn run(&self) {
        while !self.stop_flag.load(Ordering::Acquire) {
            let idle = match self.process_once().await {
                Ok(report) => report.acquired == 0,
                Err(e) => {
                    tracing::error!(error = %e, "Outbox batch failed");
                    true
                }
            };
            if idle && !self.stop_flag.load(Ordering::Acquire) {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    /// Acquire and settle one batch.
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn process_once(&self) -> DomainResult<OutboxReport> {
        let batch = self
            .queue
            .acquire_batch(
                &self.config.worker_id,
                self.config.lease_duration,
                self.config.batch_size,
                Utc::now(),
            )
            .await?;
        let mut report = OutboxReport {
            acquired: batch.len(),
            ..OutboxReport::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let mut done = Vec::new();
        let mut to_embed: Vec<(OutboxEntry, EntityDocument)> = Vec::new();

        for entry in batch {
            if entry.operation.removes_from_index() {
                self.remove(entry, &mut done, &mut report).await?;
                continue;
            }
            match self
                .documents
                .load(entry.user_id, entry.entity_type, entry.entity_id)
                .await
            {
                Ok(Some(document)) => to_embed.push((entry, document)),
                Ok(None) => self.remove(entry, &mut done, &mut report).await?,
                Err(e) => self.fail(&entry, &e.to_string(), &mut report).await?,
            }
        }

        self.index(to_embed, &mut done, &mut report).await?;
        self.queue.mark_processed(&done, &self.config.worker_id).await?;

        tracing::info!(
            acquired = report.acquired,
            indexed = report.indexed,
            removed = report.removed,
            failed = report.failed,
            abandoned = report.abandoned,
            "Outbox batch settled"
        );
        Ok(report)
    }

    async fn index(
        &self,
        pending: Vec<(OutboxEntry, EntityDocument)>,
        done: &mut Vec<i64>,
        report: &mut OutboxReport,
    ) -> DomainResult<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let inputs: Vec<EmbeddingInput> = pending
            .iter()
            .map(|(entry, document)| EmbeddingInput {
                id: entry.id.to_string(),
                text: document.text.clone(),
            })
            .collect();

        let mut vectors: HashMap<String, Vec<f32>> = match self.embeddings.embed_batch(&inputs).await {
            Ok(outputs) => outputs.into_iter().map(|o| (o.id, o.vector)).collect(),
            Err(e) => {
                let error = e.to_string();
                for (entry, _) in &pending {
                    self.fail(entry, &error, report).await?;
                }
                return Ok(());
            }
        };

        let now = Utc::now();
        for (entry, document) in pending {
            let Some(vector) = vectors.remove(&entry.id.to_string()) else {
                self.fail(&entry, "embedding missing from batch response", report).await?;
                continue;
            };
            if vector.is_empty() {
                report.unindexed += 1;
                done.push(entry.id);
                continue;
            }

            let upsert = self
                .vectors
                .upsert(&VectorDocument {
                    user_id: document.user_id,
                    entity_type: document.entity_type,
                    entity_id: document.entity_id,
                    content: document.text,
                    vector,
                    model: self.embeddings.model().to_string(),
                    updated_at: now,
                })
                .await;
            match upsert {
                Ok(()) => {
                    report.indexed += 1;
                    done.push(entry.id);
                }
                Err(e) => self.fail(&entry, &e.to_string(), report).await?,
            }
        }
        Ok(())
    }

    async fn remove(&self, entry: OutboxEntry, done: &mut Vec<i64>, report: &mut OutboxReport) -> DomainResult<()> {
        match self.vectors.delete(entry.entity_type, entry.entity_id).await {
            Ok(_) => {
                report.removed += 1;
                done.push(entry.id);
                Ok(())
            }
            Err(e) => self.fail(&entry, &e.to_string(), report).await,
        }
    }

    async fn fail(&self, entry: &OutboxEntry, error: &str, report: &mut OutboxReport) -> DomainResult<()> {
        tracing::warn!(
            entry_id = entry.id,
            entity_type = entry.entity_type.as_str(),
            entity_id = %entry.entity_id,
            error,
            "Outbox entry failed"
        );
        let abandoned = self
            .queue
            .mark_failed(entry.id, &self.config.worker_id, error, self.config.max_retries)
            .await?;
        if abandoned {
            report.abandoned += 1;
        } else {
            report.failed += 1;
        }
        Ok(())
    }
}
