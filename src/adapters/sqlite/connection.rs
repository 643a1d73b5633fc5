//! SQLite connection pool management.
//!
//! Every pool runs in WAL mode. Workers, the maintenance loop and CLI
//! readers share one database file, and WAL lets those readers proceed
//! while a queue write holds the lock.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::DatabaseConfig;

/// URL of the private in-memory database used by tests.
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// How long a writer waits on SQLite's write lock before failing with `SQLITE_BUSY`.
///
/// Lease acquisition and settlement are single statements or short
/// transactions, so a few seconds covers any honest contention.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a caller waits for a free pooled connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connections kept open while idle, so the maintenance loop never pays for a reconnect.
const MIN_IDLE_CONNECTIONS: u32 = 1;

/// Errors raised while opening a database.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The pool could not open its connections
    #[error("Failed to create pool: {0}")]
    PoolCreationFailed(#[source] sqlx::Error),
    /// The URL is not a valid `sqlite:` URL
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    /// The database file's parent directory could not be created
    #[error("Failed to create directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
    /// A liveness query failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),
}

/// Pool sizing and lock tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Wait for a free connection before giving up
    pub acquire_timeout: Duration,
    /// Wait on the write lock before giving up
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            acquire_timeout: Duration::from_secs(config.connect_timeout_secs),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        }
    }
}

fn connect_options(database_url: &str, config: &PoolConfig) -> Result<SqliteConnectOptions, ConnectionError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|_| ConnectionError::InvalidDatabaseUrl(database_url.to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        // Under WAL, NORMAL only risks the last commit on power loss; leases
        // that vanish that way are reclaimed by the next sweep.
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);
    Ok(options)
}

/// Open a pool on `database_url`, creating the file and its directory if needed.
pub async fn create_pool(database_url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, ConnectionError> {
    let config = config.unwrap_or_default();
    if let Some(file) = database_file(database_url) {
        ensure_parent_directory(file)?;
    }
    let options = connect_options(database_url, &config)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(MIN_IDLE_CONNECTIONS.min(config.max_connections))
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(ConnectionError::PoolCreationFailed)
}

/// Single-connection in-memory pool for tests.
///
/// Each in-memory connection is its own database, so the pool is capped at one.
pub async fn create_test_pool() -> Result<SqlitePool, ConnectionError> {
    let options = connect_options(IN_MEMORY_URL, &PoolConfig::default())?.shared_cache(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(ConnectionError::PoolCreationFailed)
}

/// File path named by a `sqlite:` URL; `None` for in-memory databases.
fn database_file(database_url: &str) -> Option<&Path> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let path = rest.split_once('?').map_or(rest, |(path, _)| path);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(Path::new(path))
    }
}

fn ensure_parent_directory(file: &Path) -> Result<(), ConnectionError> {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(ConnectionError::DirectoryCreationFailed)
        }
        _ => Ok(()),
    }
}

/// Run a trivial query to prove the pool can reach the database.
pub async fn verify_connection(pool: &SqlitePool) -> Result<(), ConnectionError> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(ConnectionError::ConnectionFailed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_pool_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lodestar.db");
        let url = format!("sqlite:{}", path.display());

        let pool = create_pool(&url, None).await.unwrap();
        verify_connection(&pool).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_file_pool_applies_wal_and_busy_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("tuned.db").display());
        let config = PoolConfig {
            busy_timeout: Duration::from_millis(1_250),
            ..PoolConfig::default()
        };

        let pool = create_pool(&url, Some(config)).await.unwrap();
        let (journal_mode,): (String,) = sqlx::query_as("PRAGMA journal_mode").fetch_one(&pool).await.unwrap();
        let (busy_timeout,): (i64,) = sqlx::query_as("PRAGMA busy_timeout").fetch_one(&pool).await.unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
        assert_eq!(busy_timeout, 1_250);
    }

    #[test]
    fn test_pool_config_from_database_config() {
        let config = DatabaseConfig {
            max_connections: 9,
            connect_timeout_secs: 4,
            busy_timeout_ms: 750,
            ..DatabaseConfig::default()
        };
        let pool_config = PoolConfig::from(&config);
        assert_eq!(pool_config.max_connections, 9);
        assert_eq!(pool_config.acquire_timeout, Duration::from_secs(4));
        assert_eq!(pool_config.busy_timeout, Duration::from_millis(750));

        let defaults = PoolConfig::default();
        assert_eq!(defaults.busy_timeout, DEFAULT_BUSY_TIMEOUT);
        assert_eq!(defaults.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT);
    }

    #[test]
    fn test_database_file_from_url() {
        assert_eq!(database_file("sqlite:data/q.db"), Some(Path::new("data/q.db")));
        assert_eq!(database_file("sqlite://data/q.db?mode=rwc"), Some(Path::new("data/q.db")));
        assert_eq!(database_file(IN_MEMORY_URL), None);
        assert_eq!(database_file("sqlite::memory:?cache=shared"), None);
    }
}
