//! Implementation of the `lodestar health` command.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::{Config, QueueHealth, QueueStatus};
use crate::domain::ports::{OutboxQueue, SignalQueue};

#[derive(Debug, Serialize)]
pub struct HealthOutput {
    pub signal_queue: QueueHealth,
    pub outbox_queue: QueueHealth,
}

impl CommandOutput for HealthOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["", "signals", "outbox"]);
        for status in QueueStatus::ALL {
            table.add_row(vec![
                status.as_str().to_string(),
                self.signal_queue.count(status).to_string(),
                self.outbox_queue.count(status).to_string(),
            ]);
        }
        table.add_row(vec![
            "oldest pending".to_string(),
            format_age(self.signal_queue.oldest_pending_age_secs),
            format_age(self.outbox_queue.oldest_pending_age_secs),
        ]);
        table.add_row(vec![
            "lease reclaims".to_string(),
            self.signal_queue.total_reclaims.to_string(),
            self.outbox_queue.total_reclaims.to_string(),
        ]);
        table.add_row(vec![
            "abandoned".to_string(),
            self.signal_queue.abandoned.to_string(),
            self.outbox_queue.abandoned.to_string(),
        ]);
        table.to_string()
    }
}

fn format_age(secs: Option<i64>) -> String {
    match secs {
        None => "-".to_string(),
        Some(s) if s < 120 => format!("{s}s"),
        Some(s) if s < 7_200 => format!("{}m", s / 60),
        Some(s) => format!("{}h", s / 3_600),
    }
}

/// Handle health command
pub async fn execute(config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let now = Utc::now();
    let signal_queue = ctx
        .signal_queue()
        .health(now)
        .await
        .context("Failed to read signal queue health")?;
    let outbox_queue = ctx
        .outbox_queue()
        .health(now)
        .await
        .context("Failed to read outbox health")?;

    output(&HealthOutput { signal_queue, outbox_queue }, json_mode);
    Ok(())
}
