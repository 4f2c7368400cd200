//! Storage layer for the evidence indexer.
//!
//! This module provides database operations for:
//! - Raw events (deduplicated contract logs with processing state)
//! - Sync checkpoints (per-contract resume point)
//! - Evidence (the projection maintained by the processors)

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod checkpoint;
pub mod events;
pub mod evidence;
pub mod types;

pub use types::*;

/// Database storage for the indexer.
///
/// Provides async access to SQLite database with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Call
    /// [`run_migrations`](Self::run_migrations) before first use.
    ///
    /// # Example
    /// ```no_run
    /// # use evidence_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://evidence.db", None, None).await?;
    /// storage.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, None, None).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN processed = 0 THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN processed = 0 AND failure_count > 0 THEN 1 ELSE 0 END), 0)
            FROM raw_events
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count raw events")?;

        let evidence_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evidence")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count evidence")?;

        Ok(DatabaseStats {
            raw_event_count: row.0 as u64,
            unprocessed_count: row.1 as u64,
            failing_count: row.2 as u64,
            evidence_count: evidence_count as u64,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total stored raw events
    pub raw_event_count: u64,

    /// Raw events not yet processed
    pub unprocessed_count: u64,

    /// Unprocessed raw events that failed at least once
    pub failing_count: u64,

    /// Evidence rows in the projection
    pub evidence_count: u64,
}


#[cfg(test)]
mod tests {
    use super::test_support::temp_storage;

    #[tokio::test]
    async fn test_storage_creation() {
        let (storage, _temp_db) = temp_storage().await;

        storage.health_check().await.unwrap();

        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_stats_empty() {
        let (storage, _temp_db) = temp_storage().await;

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.raw_event_count, 0);
        assert_eq!(stats.unprocessed_count, 0);
        assert_eq!(stats.failing_count, 0);
        assert_eq!(stats.evidence_count, 0);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (storage, _temp_db) = temp_storage().await;
        storage.run_migrations().await.unwrap();
        storage.health_check().await.unwrap();
    }
}
