//! Implementation of the `lodestar outbox` command.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::adapters::embeddings::build_embedding_provider;
use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::{OutboxProcessor, OutboxProcessorConfig, OutboxReport};

#[derive(Debug, Serialize)]
pub struct OutboxOutput {
    pub worker_id: String,
    #[serde(flatten)]
    pub report: OutboxReport,
}

impl CommandOutput for OutboxOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        if r.acquired == 0 {
            return "Outbox is empty.".to_string();
        }
        format!(
            "{} outbox entr{}: {} indexed, {} removed, {} without embedding, {} failed ({} abandoned)",
            r.acquired,
            if r.acquired == 1 { "y" } else { "ies" },
            r.indexed,
            r.removed,
            r.unindexed,
            r.failed,
            r.abandoned
        )
    }
}

/// Handle outbox command
pub async fn execute(config: Config, watch: bool, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let embeddings =
        build_embedding_provider(&ctx.config.embeddings).context("Failed to build embedding provider")?;
    let worker_id = format!("outbox-{}", ctx.config.queue.resolved_worker_id());
    let processor = Arc::new(OutboxProcessor::new(
        ctx.outbox_queue(),
        Arc::new(ctx.snapshots()),
        embeddings,
        ctx.vector_store(),
        OutboxProcessorConfig::from_config(&ctx.config.outbox, worker_id.clone()),
    ));

    if !watch {
        let report = processor.process_once().await.context("Outbox batch failed")?;
        output(&OutboxOutput { worker_id, report }, json_mode);
        return Ok(());
    }

    let stopper = processor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping outbox processor");
            stopper.stop();
        }
    });
    processor.run().await;
    Ok(())
}
