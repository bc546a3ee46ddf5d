/// Database migrations for the preference cache

use super::schema::{statements_for, SCHEMA_VERSION};
use crate::error::{Error, Result};
use sqlx::SqlitePool;

/// Run all database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_current_version(pool).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!(
        "Running database migrations from version {} to {}",
        current_version,
        SCHEMA_VERSION
    );

    // One transaction for all steps
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::Database(format!("Failed to begin migration transaction: {}", e)))?;

    for version in (current_version + 1)..=SCHEMA_VERSION {
        migrate_to(&mut tx, version).await?;

        sqlx::query("INSERT OR REPLACE INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to update schema version: {}", e)))?;
    }

    tx.commit()
        .await
        .map_err(|e| Error::Database(format!("Failed to commit migration transaction: {}", e)))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

/// Get current database schema version
async fn get_current_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to check schema_version table: {}", e)))?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get current schema version: {}", e)))?;

    Ok(version.unwrap_or(0))
}

async fn migrate_to(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, version: i32) -> Result<()> {
    tracing::info!("Running migration to version {}", version);

    let statements = statements_for(version)
        .ok_or_else(|| Error::Database(format!("Unknown schema version: {}", version)))?;

    for sql in statements {
        sqlx::query(sql)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::Database(format!("Migration to version {} failed: {}", version, e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, DatabaseConfig};

    #[tokio::test]
    async fn test_migrations() {
        let db = Database::new(DatabaseConfig::in_memory()).await.unwrap();

        let version = get_current_version(db.pool()).await.unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();

        for expected_table in ["schema_version", "preferences", "pending_sync_jobs"] {
            assert!(
                tables.contains(&expected_table.to_string()),
                "Table {} not found",
                expected_table
            );
        }

        db.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::new(DatabaseConfig::in_memory()).await.unwrap();
        run_migrations(db.pool()).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, SCHEMA_VERSION as i64);

        db.close().await;
    }
}
