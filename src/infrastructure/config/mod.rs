//! Configuration loading
//!
//! Hierarchical configuration using figment:
//! - YAML file loading
//! - `LODESTAR_*` environment variable overrides
//! - Validation of every section

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
