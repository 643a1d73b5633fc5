//! Implementation of the `lodestar enqueue` command.

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, EntityKind, SignalEventType};
use crate::domain::ports::SignalQueue;

#[derive(Debug, Serialize)]
pub struct EnqueueOutput {
    pub signal_id: i64,
    pub user_id: Uuid,
    pub event_type: SignalEventType,
    pub priority: String,
    pub window: String,
    pub expires_at: String,
}

impl CommandOutput for EnqueueOutput {
    fn to_human(&self) -> String {
        format!(
            "Enqueued signal {} ({}) for user {}\n  priority: {}\n  window:   {}\n  expires:  {}",
            self.signal_id,
            self.event_type.as_str(),
            self.user_id,
            self.priority,
            self.window,
            self.expires_at
        )
    }
}

/// Handle enqueue command
pub async fn execute(
    config: Config,
    user_id: Uuid,
    event_type: SignalEventType,
    target: Option<(EntityKind, Uuid)>,
    json_mode: bool,
) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let intake = ctx.signal_intake();
    let signal_id = intake
        .record(user_id, event_type, target)
        .await
        .context("Failed to enqueue signal")?;

    let entry = ctx
        .signal_queue()
        .get(signal_id)
        .await?
        .context("Enqueued signal disappeared")?;

    output(
        &EnqueueOutput {
            signal_id,
            user_id,
            event_type,
            priority: entry.priority.as_str().to_string(),
            window: entry.window_type.as_str().to_string(),
            expires_at: entry.expires_at.to_rfc3339(),
        },
        json_mode,
    );
    Ok(())
}
