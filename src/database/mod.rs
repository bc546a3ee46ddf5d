/// SQLite database backend for the durable preference cache

pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use sqlite::SqlitePreferenceCache;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::time::Duration;

/// Database connection pool type
pub type DatabasePool = Pool<Sqlite>;

pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path, or `sqlite::memory:`
    pub database_url: String,
    /// Maximum number of connections in pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
    /// Enable WAL mode for better concurrency
    pub enable_wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:prefsync.db".to_string(),
            max_connections: 4,
            connection_timeout: 30,
            enable_wal: true,
        }
    }
}

impl DatabaseConfig {
    /// Private in-memory database, gone when the pool closes
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            max_connections: 1,
            connection_timeout: 10,
            enable_wal: false,
        }
    }

    /// On-disk database at `path`
    pub fn file(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            database_url: format!("sqlite:{}", path.as_ref().display()),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == IN_MEMORY_URL
    }
}

/// Main database manager
pub struct Database {
    pool: DatabasePool,
    config: DatabaseConfig,
}

impl Database {
    /// Open the database and bring its schema up to date
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.connection_timeout);

        let pool = if config.is_in_memory() {
            // Every connection to :memory: is its own database, so keep
            // exactly one open for the life of the pool
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .acquire_timeout(timeout)
                .connect(&config.database_url)
                .await
                .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?
        } else {
            let options = SqliteConnectOptions::new()
                .filename(config.database_url.trim_start_matches("sqlite:"))
                .create_if_missing(true)
                .busy_timeout(timeout)
                .pragma("journal_mode", if config.enable_wal { "WAL" } else { "DELETE" })
                .pragma("synchronous", "NORMAL");

            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .acquire_timeout(timeout)
                .connect_with(options)
                .await
                .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?
        };

        let database = Self { pool, config };
        database.migrate().await?;

        Ok(database)
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get database pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Close database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get database statistics
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM preferences),
                (SELECT COUNT(*) FROM pending_sync_jobs),
                page_count * page_size
            FROM pragma_page_count(), pragma_page_size()
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get stats: {}", e)))?;

        Ok(DatabaseStats {
            cached_values: row.get(0),
            pending_jobs: row.get(1),
            total_size: row.get(2),
        })
    }
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Rows in the value cache, all owners
    pub cached_values: i64,
    /// Journaled writes not yet acknowledged
    pub pending_jobs: i64,
    /// Total database size in bytes
    pub total_size: i64,
}
