//! Lodestar CLI entry point.

use clap::Parser;

use lodestar::cli::{commands, Cli, Commands};
use lodestar::infrastructure::{ConfigLoader, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load_with_override(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => lodestar::cli::handle_error(err, cli.json),
    };
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => lodestar::cli::handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Init { force } => commands::init::execute(config, force, cli.json).await,
        Commands::Enqueue {
            user,
            event,
            target_kind,
            target_id,
        } => {
            let target = target_kind.zip(target_id);
            commands::enqueue::execute(config, user, event, target, cli.json).await
        }
        Commands::Worker { once, worker_id, window } => {
            commands::worker::execute(config, once, worker_id, window, cli.json).await
        }
        Commands::Outbox { watch } => commands::outbox::execute(config, watch, cli.json).await,
        Commands::Sweep { watch } => commands::sweep::execute(config, watch, cli.json).await,
        Commands::Health => commands::health::execute(config, cli.json).await,
        Commands::Assess { user, mock } => commands::assess::execute(config, user, mock, cli.json).await,
    };

    if let Err(err) = result {
        lodestar::cli::handle_error(err, cli.json);
    }
}
