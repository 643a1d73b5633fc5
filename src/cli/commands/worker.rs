//! Implementation of the `lodestar worker` command.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::{Config, WindowType};
use crate::services::{BatchReport, SignalWorker, SignalWorkerConfig};

#[derive(Debug, Serialize)]
pub struct OutcomeRow {
    pub user_id: String,
    pub tier: String,
    pub selection_method: String,
    pub candidates: usize,
    pub dropped: usize,
}

#[derive(Debug, Serialize)]
pub struct WorkerOutput {
    pub worker_id: String,
    pub acquired: usize,
    pub users: usize,
    pub processed: u64,
    pub skipped: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub outcomes: Vec<OutcomeRow>,
}

impl WorkerOutput {
    fn from_report(worker_id: String, report: BatchReport) -> Self {
        Self {
            worker_id,
            acquired: report.acquired,
            users: report.users,
            processed: report.processed,
            skipped: report.skipped,
            retried: report.retried,
            abandoned: report.abandoned,
            outcomes: report
                .outcomes
                .iter()
                .map(|o| OutcomeRow {
                    user_id: o.user_id.to_string(),
                    tier: o.tier_reached.as_str().to_string(),
                    selection_method: o.selection_method.as_str().to_string(),
                    candidates: o.candidates.len(),
                    dropped: o.dropped_candidates,
                })
                .collect(),
        }
    }
}

impl CommandOutput for WorkerOutput {
    fn to_human(&self) -> String {
        if self.acquired == 0 {
            return "No pending signals.".to_string();
        }
        let mut lines = vec![format!(
            "{} signal(s) for {} user(s): {} processed, {} skipped, {} retried, {} abandoned",
            self.acquired, self.users, self.processed, self.skipped, self.retried, self.abandoned
        )];
        if !self.outcomes.is_empty() {
            let mut table = list_table(&["user", "tier", "method", "candidates", "dropped"]);
            for row in &self.outcomes {
                table.add_row(vec![
                    row.user_id.clone(),
                    row.tier.clone(),
                    row.selection_method.clone(),
                    row.candidates.to_string(),
                    row.dropped.to_string(),
                ]);
            }
            lines.push(table.to_string());
        }
        lines.join("\n")
    }
}

/// Handle worker command
pub async fn execute(
    config: Config,
    once: bool,
    worker_id: Option<String>,
    windows: Vec<WindowType>,
    json_mode: bool,
) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let pipeline = Arc::new(ctx.pipeline(false)?);

    let mut worker_config = SignalWorkerConfig::from_config(&ctx.config.queue);
    if let Some(id) = worker_id {
        worker_config.worker_id = id;
    }
    if !windows.is_empty() {
        worker_config.windows = Some(windows);
    }
    let worker = SignalWorker::new(ctx.signal_queue(), pipeline, worker_config);

    if once {
        let report = worker.process_once().await.context("Signal batch failed")?;
        output(&WorkerOutput::from_report(worker.config().worker_id.clone(), report), json_mode);
        return Ok(());
    }

    let handle = worker.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing current batch");
            handle.stop();
        }
    });
    worker.run().await;
    Ok(())
}
