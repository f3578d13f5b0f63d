//! # Database Connection Pool Module
//!
//! SQLite connection pooling for the file-indexed library store.
//!
//! ## Features
//!
//! - **WAL Mode**: readers never block the position writer
//! - **Foreign Keys**: deleting a collection cascades to its items
//! - **Automatic Migrations**: run on pool creation
//! - **Health Check**: `SELECT 1` before the pool is handed out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("library.db")).await?;
//! ```
//!
//! ## Testing
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database configuration for SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,

    pub min_connections: u32,

    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    pub max_lifetime: Option<Duration>,

    pub idle_timeout: Option<Duration>,

    /// Number of prepared statements cached per connection
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    /// Configuration for a database file at `database_path`.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        let database_url = format!("sqlite:{}", path.display());

        Self {
            database_url,
            min_connections: 1,
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_cache_capacity: 64,
        }
    }

    /// Configuration for an in-memory database.
    ///
    /// Every SQLite connection to `:memory:` opens its own database, so the
    /// pool is pinned to a single connection that never expires.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
            statement_cache_capacity: 64,
        }
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool.
///
/// Configures connection options, opens the pool, applies migrations and
/// runs a health check.
///
/// # Errors
///
/// Fails if the database cannot be opened, a migration fails, or the health
/// check query fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .statement_cache_capacity(config.statement_cache_capacity);

    debug!("SQLite connection options configured");

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            LibraryError::Database(e)
        })?;

    info!(
        connections = pool.size(),
        "Database connection pool created successfully"
    );

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            LibraryError::Migration(e.to_string())
        })?;

    info!("Database migrations completed successfully");
    Ok(())
}

async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Performing database health check");

    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        LibraryError::Database(e)
    })?;

    debug!("Database health check passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_pool_and_health_check() {
        let pool = create_test_pool().await.unwrap();
        assert!(health_check(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_builder() {
        let config = DatabaseConfig::new("/tmp/library.db")
            .min_connections(2)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .statement_cache_capacity(10);

        assert_eq!(config.database_url, "sqlite:/tmp/library.db");
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.statement_cache_capacity, 10);
        assert_eq!(DatabaseConfig::default().max_connections, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in ["collections", "items", "session_settings"] {
            let result: (i32,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();

            assert_eq!(result.0, 1, "{} table should exist", table);
        }
    }
}
