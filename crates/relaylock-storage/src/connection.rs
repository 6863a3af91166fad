//! SQLite pool for the lock registry.
//!
//! A registry lives either in a file, shared by a small WAL-mode pool, or in
//! memory. An in-memory database exists only as long as its one connection,
//! so that pool never grows, idles out or recycles.

use crate::error::{StorageError, StorageResult};
use sqlx::ConnectOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Default database file used when no path is configured
pub const DEFAULT_DATABASE_PATH: &str = "relaylock.db";

/// Path that selects an in-memory registry
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Re-arm tasks and the access flow write concurrently; a handful of
/// connections is enough for SQLite's single writer.
const FILE_POOL_SIZE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database file, or [`IN_MEMORY_PATH`]
    pub database_path: String,

    /// How long a writer waits for SQLite's write lock
    pub busy_timeout: Duration,

    /// How long a caller waits for a pooled connection
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_PATH)
    }
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            busy_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_PATH)
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path == IN_MEMORY_PATH
    }

    fn connect_options(&self) -> StorageResult<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::from_str(&format!("sqlite://{}", self.database_path))
                .map_err(|e| StorageError::Configuration(format!("Invalid database path: {e}")))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };

        // Access events and re-arm records rely on their foreign keys.
        Ok(options
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
            .disable_statement_logging())
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let pool = SqlitePoolOptions::new().acquire_timeout(self.acquire_timeout);

        if self.is_in_memory() {
            pool.max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool.max_connections(FILE_POOL_SIZE)
        }
    }
}

/// Migrated connection pool over the lock registry
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the registry and bring its schema up to date.
    ///
    /// Missing parent directories of a database file are created.
    pub async fn new(config: DatabaseConfig) -> StorageResult<Self> {
        if !config.is_in_memory()
            && let Some(parent) = Path::new(&config.database_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Configuration(format!("Failed to create database directory: {e}"))
            })?;
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await?;
        info!(path = %config.database_path, "Lock registry opened");

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open a fresh registry that lives as long as the returned handle
    pub async fn in_memory() -> StorageResult<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    /// Apply the workspace `migrations/`, embedded at compile time
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        debug!("Migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for checked-out connections, then close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
