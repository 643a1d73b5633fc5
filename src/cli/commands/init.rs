//! Implementation of the `lodestar init` command.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

const PROJECT_DIR: &str = ".lodestar";

#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub config_path: PathBuf,
    pub config_written: bool,
    pub directories_created: Vec<String>,
    pub database_path: String,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push(format!("\nWrote default config to {}", self.config_path.display()));
        }
        lines.push(format!("Database ready at {}", self.database_path));
        lines.join("\n")
    }
}

/// Handle init command
pub async fn execute(config: Config, force: bool, json_mode: bool) -> Result<()> {
    let root = std::env::current_dir().context("Failed to get current directory")?;
    let result = initialize(&root, config, force).await?;
    output(&result, json_mode);
    Ok(())
}

/// Create the project directory layout under `root` and migrate the database.
pub async fn initialize(root: &Path, mut config: Config, force: bool) -> Result<InitOutput> {
    let project_dir = root.join(PROJECT_DIR);
    let config_path = project_dir.join("config.yaml");
    if config.snapshots.directory.is_relative() {
        config.snapshots.directory = root.join(&config.snapshots.directory);
    }
    if Path::new(&config.database.path).is_relative() {
        config.database.path = root.join(&config.database.path).display().to_string();
    }

    let mut directories_created = Vec::new();
    for dir in [project_dir.clone(), config.snapshots.directory.clone()] {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let relative = dir.strip_prefix(root).unwrap_or(&dir).display().to_string();
            directories_created.push(relative);
        }
    }

    let config_written = force || !config_path.exists();
    if config_written {
        let yaml = serde_yaml::to_string(&Config::default()).context("Failed to render default config")?;
        fs::write(&config_path, yaml)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    let pool = initialize_database(&config.database)
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    Ok(InitOutput {
        success: true,
        message: "Lodestar initialized.".to_string(),
        config_path,
        config_written,
        directories_created,
        database_path: config.database.path,
    })
}
