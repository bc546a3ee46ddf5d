/// SQLite implementation of the preference cache

use crate::{
    error::{Error, Result},
    store::{CacheOwner, JournalEntry, PreferenceCache},
    types::{AccountId, SettingValue},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::warn;

/// Preference cache backed by the `preferences` and `pending_sync_jobs`
/// tables
#[derive(Clone)]
pub struct SqlitePreferenceCache {
    pool: SqlitePool,
}

impl SqlitePreferenceCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceCache for SqlitePreferenceCache {
    async fn load(&self, owner: &CacheOwner) -> Result<HashMap<String, SettingValue>> {
        let rows = sqlx::query("SELECT key, value_json FROM preferences WHERE owner = ?")
            .bind(owner.storage_key())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to load preferences for {}: {}", owner, e)))?;

        let mut values = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            let json: String = row.get("value_json");
            match serde_json::from_str::<SettingValue>(&json) {
                Ok(value) => {
                    values.insert(key, value);
                }
                Err(e) => warn!("Skipping unreadable cached value for {} ({}): {}", key, owner, e),
            }
        }

        Ok(values)
    }

    async fn save(&self, owner: &CacheOwner, key: &str, value: &SettingValue) -> Result<()> {
        let json = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO preferences (owner, key, value_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(owner, key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner.storage_key())
        .bind(key)
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to save {} for {}: {}", key, owner, e)))?;

        Ok(())
    }

    async fn clear(&self, owner: &CacheOwner) -> Result<()> {
        sqlx::query("DELETE FROM preferences WHERE owner = ?")
            .bind(owner.storage_key())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to clear preferences for {}: {}", owner, e)))?;

        Ok(())
    }

    async fn save_job(&self, entry: &JournalEntry) -> Result<()> {
        let json = serde_json::to_string(&entry.value)?;

        sqlx::query(
            r#"
            INSERT INTO pending_sync_jobs (account, key, value_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(account, key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.account.to_string())
        .bind(&entry.key)
        .bind(json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to journal write of {}: {}", entry.key, e)))?;

        Ok(())
    }

    async fn remove_job(&self, account: &AccountId, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM pending_sync_jobs WHERE account = ? AND key = ?")
            .bind(account.to_string())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to remove journaled write of {}: {}", key, e)))?;

        Ok(())
    }

    async fn load_jobs(&self, account: &AccountId) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query("SELECT key, value_json FROM pending_sync_jobs WHERE account = ? ORDER BY key")
            .bind(account.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to load journal for {}: {}", account, e)))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("key");
            let json: String = row.get("value_json");
            match serde_json::from_str::<SettingValue>(&json) {
                Ok(value) => entries.push(JournalEntry {
                    account: account.clone(),
                    key,
                    value,
                }),
                Err(e) => warn!("Dropping unreadable journaled write of {}: {}", key, e),
            }
        }

        Ok(entries)
    }
}
