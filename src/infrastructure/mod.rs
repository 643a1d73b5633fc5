//! Infrastructure: configuration loading and logging bootstrap.

pub mod config;
pub mod logging;

pub use config::{ConfigError, ConfigLoader};
pub use logging::LoggerImpl;
