//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::models::{EntityKind, SignalEventType, WindowType};

#[derive(Parser)]
#[command(name = "lodestar")]
#[command(about = "Lodestar - tiered signal escalation for life-management coaching", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file used in place of .lodestar/config.yaml and local.yaml
    #[arg(short, long, global = true, env = "LODESTAR_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .lodestar directory, default config and database
    Init {
        /// Overwrite an existing config.yaml
        #[arg(short, long)]
        force: bool,
    },

    /// Record a domain event as a queued signal
    Enqueue {
        /// User the event belongs to
        #[arg(short, long)]
        user: Uuid,

        /// Event type, e.g. task_overdue or habit_missed
        #[arg(short, long, value_parser = parse_event_type)]
        event: SignalEventType,

        /// Kind of the entity the event is about
        #[arg(long, value_parser = parse_entity_kind, requires = "target_id")]
        target_kind: Option<EntityKind>,

        /// Id of the entity the event is about
        #[arg(long, requires = "target_kind")]
        target_id: Option<Uuid>,
    },

    /// Run the signal worker
    Worker {
        /// Process a single batch and exit
        #[arg(long)]
        once: bool,

        /// Override the worker id from config
        #[arg(long)]
        worker_id: Option<String>,

        /// Only acquire signals for these delivery windows (comma-separated)
        #[arg(short, long, value_delimiter = ',', value_parser = parse_window)]
        window: Vec<WindowType>,
    },

    /// Index pending entity changes into the vector store
    Outbox {
        /// Keep polling instead of processing one batch
        #[arg(long)]
        watch: bool,
    },

    /// Reclaim lapsed leases, expire stale signals and purge old entries
    Sweep {
        /// Run the maintenance daemon until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Show signal and outbox queue health
    Health,

    /// Run the escalation pipeline once for a user
    Assess {
        /// User whose snapshot is assessed
        #[arg(short, long)]
        user: Uuid,

        /// Use the offline mock generative service
        #[arg(long)]
        mock: bool,
    },
}

fn parse_event_type(s: &str) -> Result<SignalEventType, String> {
    SignalEventType::from_str(s).ok_or_else(|| {
        let known: Vec<&str> = SignalEventType::ALL.iter().map(SignalEventType::as_str).collect();
        format!("unknown event type '{s}', expected one of: {}", known.join(", "))
    })
}

fn parse_entity_kind(s: &str) -> Result<EntityKind, String> {
    EntityKind::from_str(s).ok_or_else(|| format!("unknown entity kind '{s}'"))
}

fn parse_window(s: &str) -> Result<WindowType, String> {
    WindowType::from_str(s).ok_or_else(|| format!("unknown window '{s}'"))
}
