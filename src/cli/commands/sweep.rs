//! Implementation of the `lodestar sweep` command.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::queue_maintenance::{MaintenanceEvent, StopReason};
use crate::services::{MaintenanceConfig, MaintenanceReport, QueueMaintenanceDaemon};

#[derive(Debug, Serialize)]
pub struct SweepOutput {
    #[serde(flatten)]
    pub report: MaintenanceReport,
}

impl CommandOutput for SweepOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        if r.is_empty() {
            return "Nothing to clean up.".to_string();
        }
        [
            format!(
                "Signals: {} reclaimed, {} abandoned, {} expired, {} purged",
                r.signals_reclaimed, r.signals_abandoned, r.signals_expired, r.signals_purged
            ),
            format!(
                "Outbox:  {} reclaimed, {} abandoned, {} archived",
                r.outbox_reclaimed, r.outbox_abandoned, r.outbox_archived
            ),
        ]
        .join("\n")
    }
}

/// Handle sweep command
pub async fn execute(config: Config, watch: bool, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let daemon = QueueMaintenanceDaemon::new(
        ctx.signal_queue(),
        ctx.outbox_queue(),
        MaintenanceConfig::from_config(&ctx.config),
    );

    if !watch {
        let report = daemon.run_once().await.context("Maintenance sweep failed")?;
        output(&SweepOutput { report }, json_mode);
        return Ok(());
    }

    let handle = daemon.handle();
    let mut events = daemon.run();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(MaintenanceEvent::SweepCompleted { report, .. }) if json_mode && !report.is_empty() => {
                    output(&SweepOutput { report }, true);
                }
                Some(MaintenanceEvent::Stopped { reason }) => {
                    if reason == StopReason::TooManyFailures {
                        anyhow::bail!("Maintenance daemon stopped after repeated sweep failures");
                    }
                    return Ok(());
                }
                Some(_) => {}
                None => return Ok(()),
            },
            interrupted = tokio::signal::ctrl_c() => {
                interrupted.context("Failed to listen for ctrl-c")?;
                tracing::info!("Interrupt received, stopping maintenance daemon");
                handle.stop();
                return Ok(());
            }
        }
    }
}
