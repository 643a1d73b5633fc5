use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{Config, FactorWeight};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid {section}.batch_size: must be at least 1")]
    InvalidBatchSize { section: &'static str },

    #[error("Invalid {section}.lease_duration_secs: {value}. Must be positive")]
    InvalidLeaseDuration { section: &'static str, value: i64 },

    #[error("Invalid {section}.max_retries: cannot be 0")]
    InvalidMaxRetries { section: &'static str },

    #[error("Invalid {field}: {value}. Must be within [0, 1]")]
    ThresholdOutOfRange { field: &'static str, value: f64 },

    #[error("Invalid {field}: must be greater than zero")]
    ZeroTimeout { field: &'static str },

    #[error("Quick assessment weights must sum to 1.0, got {0:.3}")]
    WeightsDoNotSum(f64),

    #[error("Unknown {kind} provider: {name}")]
    UnknownProvider { kind: &'static str, name: String },
}

const PROJECT_CONFIG: &str = ".lodestar/config.yaml";
const LOCAL_CONFIG: &str = ".lodestar/local.yaml";
const ENV_PREFIX: &str = "LODESTAR_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.lodestar/config.yaml` (created by `lodestar init`)
    /// 3. `.lodestar/local.yaml` (optional local overrides)
    /// 4. `LODESTAR_*` environment variables, `__` separating sections
    pub fn load() -> Result<Config> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(PROJECT_CONFIG))
            .merge(Yaml::file(LOCAL_CONFIG));
        Self::finish(figment).context("Failed to load configuration")
    }

    /// Load from one explicit file in place of the project YAML files.
    /// Environment variables still apply on top.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path));
        Self::finish(figment).with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// `load_from_file` when a path is given, `load` otherwise.
    pub fn load_with_override(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    fn finish(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }
        if config.database.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "database.connect_timeout_secs",
            });
        }
        if config.database.busy_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "database.busy_timeout_ms",
            });
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        validate_queue("queue", config.queue.batch_size, config.queue.lease_duration_secs, config.queue.max_retries)?;
        validate_queue(
            "outbox",
            config.outbox.batch_size,
            config.outbox.lease_duration_secs,
            config.outbox.max_retries,
        )?;
        if config.queue.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "queue.poll_interval_ms",
            });
        }
        if config.outbox.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "outbox.poll_interval_ms",
            });
        }

        let rules = &config.rules;
        unit_interval("rules.habit_low_adherence", rules.habit_low_adherence)?;
        unit_interval("rules.goal_behind_ratio", rules.goal_behind_ratio)?;

        let delta = &config.delta;
        for (field, factor) in [
            ("delta.new_entities", &delta.new_entities),
            ("delta.modified_entities", &delta.modified_entities),
            ("delta.completed_items", &delta.completed_items),
            ("delta.missed_items", &delta.missed_items),
            ("delta.new_signals", &delta.new_signals),
        ] {
            factor_in_range(field, factor)?;
        }

        let quick = &config.quick_assessment;
        unit_interval("quick_assessment.escalation_threshold", quick.escalation_threshold)?;
        unit_interval("quick_assessment.relevance_weight", quick.relevance_weight)?;
        unit_interval("quick_assessment.delta_weight", quick.delta_weight)?;
        unit_interval("quick_assessment.urgency_weight", quick.urgency_weight)?;
        unit_interval("quick_assessment.severity_cap", quick.severity_cap)?;
        unit_interval("quick_assessment.urgency_override", quick.urgency_override)?;
        unit_interval("quick_assessment.delta_override", quick.delta_override)?;
        for (field, factor) in [
            ("quick_assessment.urgent_signals", &quick.urgent_signals),
            ("quick_assessment.window_signals", &quick.window_signals),
            ("quick_assessment.low_signals", &quick.low_signals),
        ] {
            factor_in_range(field, factor)?;
        }
        let weight_sum = quick.relevance_weight + quick.delta_weight + quick.urgency_weight;
        if (weight_sum - 1.0).abs() > 0.001 {
            return Err(ConfigError::WeightsDoNotSum(weight_sum));
        }

        unit_interval("rag.similarity_threshold", config.rag.similarity_threshold)?;
        if config.rag.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout { field: "rag.timeout_ms" });
        }

        let generative = &config.generative;
        if generative.stage_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "generative.stage_timeout_secs",
            });
        }
        if generative.generation_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "generative.generation_timeout_secs",
            });
        }
        if !["anthropic", "mock"].contains(&generative.provider.as_str()) {
            return Err(ConfigError::UnknownProvider {
                kind: "generative",
                name: generative.provider.clone(),
            });
        }

        if config.embeddings.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "embeddings.timeout_secs",
            });
        }
        if !["openai", "null"].contains(&config.embeddings.provider.as_str()) {
            return Err(ConfigError::UnknownProvider {
                kind: "embeddings",
                name: config.embeddings.provider.clone(),
            });
        }

        Ok(())
    }
}

fn validate_queue(
    section: &'static str,
    batch_size: usize,
    lease_duration_secs: i64,
    max_retries: u32,
) -> Result<(), ConfigError> {
    if batch_size == 0 {
        return Err(ConfigError::InvalidBatchSize { section });
    }
    if lease_duration_secs <= 0 {
        return Err(ConfigError::InvalidLeaseDuration {
            section,
            value: lease_duration_secs,
        });
    }
    if max_retries == 0 {
        return Err(ConfigError::InvalidMaxRetries { section });
    }
    Ok(())
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { field, value })
    }
}

fn factor_in_range(field: &'static str, factor: &FactorWeight) -> Result<(), ConfigError> {
    unit_interval(field, factor.weight)?;
    unit_interval(field, factor.cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{LogFormat, RotationPolicy};
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.database.path, ".lodestar/lodestar.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.queue.max_retries, 3);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 2
  busy_timeout_ms: 1500
logging:
  level: debug
  format: json
  rotation: hourly
queue:
  batch_size: 10
  ttl:
    immediate_hours: 2
generative:
  provider: mock
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.database.busy_timeout_ms, 1500);
        assert_eq!(config.database.connect_timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.rotation, RotationPolicy::Hourly);
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.ttl.immediate_hours, 2);
        assert_eq!(config.queue.ttl.batch_window_hours, 48);
        assert_eq!(config.generative.provider, "mock");
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConnections(0))
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_queue_sections() {
        let mut config = Config::default();
        config.queue.batch_size = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBatchSize { section: "queue" })
        ));

        let mut config = Config::default();
        config.outbox.lease_duration_secs = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLeaseDuration { section: "outbox", value: 0 })
        ));

        let mut config = Config::default();
        config.queue.max_retries = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxRetries { section: "queue" })
        ));
    }

    #[test]
    fn test_validate_threshold_out_of_range() {
        let mut config = Config::default();
        config.rag.similarity_threshold = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ThresholdOutOfRange {
                field: "rag.similarity_threshold",
                ..
            })
        ));

        let mut config = Config::default();
        config.delta.missed_items.cap = -0.1;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ThresholdOutOfRange {
                field: "delta.missed_items",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.quick_assessment.urgency_weight = 0.5;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::WeightsDoNotSum(_))
        ));

        config.quick_assessment.relevance_weight = 0.2;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let mut config = Config::default();
        config.generative.stage_timeout_secs = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroTimeout {
                field: "generative.stage_timeout_secs"
            })
        ));

        let mut config = Config::default();
        config.database.busy_timeout_ms = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroTimeout {
                field: "database.busy_timeout_ms"
            })
        ));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = Config::default();
        config.embeddings.provider = "cohere".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::UnknownProvider { kind: "embeddings", .. })
        ));
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lodestar.yaml");
        fs::write(
            &path,
            "database:\n  path: from-file.db\nqueue:\n  batch_size: 7\n",
        )
        .unwrap();

        let config = temp_env::with_vars(
            [
                ("LODESTAR_QUEUE__BATCH_SIZE", Some("11")),
                ("LODESTAR_LOGGING__LEVEL", Some("debug")),
            ],
            || ConfigLoader::load_from_file(&path).unwrap(),
        );

        assert_eq!(config.database.path, "from-file.db");
        assert_eq!(config.queue.batch_size, 11);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_env_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lodestar.yaml");
        fs::write(&path, "{}\n").unwrap();

        let result = temp_env::with_var("LODESTAR_QUEUE__BATCH_SIZE", Some("0"), || {
            ConfigLoader::load_from_file(&path)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_override_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_env::with_var_unset("LODESTAR_QUEUE__BATCH_SIZE", || {
            ConfigLoader::load_with_override(Some(&dir.path().join("absent.yaml"))).unwrap()
        });
        assert_eq!(config.queue.batch_size, Config::default().queue.batch_size);
    }
}
