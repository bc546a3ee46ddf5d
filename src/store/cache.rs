use crate::{
    error::Result,
    types::{AccountId, SettingValue},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// Partition of the durable cache a value belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheOwner {
    /// Local-only settings, shared by every account on this device
    Device,
    /// Synced settings of one account
    Account(AccountId),
}

impl CacheOwner {
    pub const DEVICE_KEY: &'static str = "device";

    /// Stable string used as the storage partition key
    pub fn storage_key(&self) -> String {
        match self {
            CacheOwner::Device => Self::DEVICE_KEY.to_string(),
            CacheOwner::Account(account) => account.to_string(),
        }
    }
}

impl fmt::Display for CacheOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// A queued remote write as recorded in the job journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub account: AccountId,
    pub key: String,
    pub value: SettingValue,
}

/// Durable key/value cache used to hydrate the store before the remote
/// service answers, plus the journal of writes not yet acknowledged.
#[async_trait]
pub trait PreferenceCache: Send + Sync {
    /// Load every cached value for `owner`
    async fn load(&self, owner: &CacheOwner) -> Result<HashMap<String, SettingValue>>;

    /// Save one value
    async fn save(&self, owner: &CacheOwner, key: &str, value: &SettingValue) -> Result<()>;

    /// Drop every value for `owner`
    async fn clear(&self, owner: &CacheOwner) -> Result<()>;

    /// Record (or replace) the pending write for `entry.account`/`entry.key`
    async fn save_job(&self, entry: &JournalEntry) -> Result<()>;

    /// Forget the pending write for `account`/`key`
    async fn remove_job(&self, account: &AccountId, key: &str) -> Result<()>;

    /// Pending writes recorded for `account`
    async fn load_jobs(&self, account: &AccountId) -> Result<Vec<JournalEntry>>;
}

/// In-memory cache implementation
pub struct MemoryCache {
    values: tokio::sync::RwLock<HashMap<CacheOwner, HashMap<String, SettingValue>>>,
    jobs: tokio::sync::RwLock<HashMap<(AccountId, String), SettingValue>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            values: tokio::sync::RwLock::new(HashMap::new()),
            jobs: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreferenceCache for MemoryCache {
    async fn load(&self, owner: &CacheOwner) -> Result<HashMap<String, SettingValue>> {
        let values = self.values.read().await;
        Ok(values.get(owner).cloned().unwrap_or_default())
    }

    async fn save(&self, owner: &CacheOwner, key: &str, value: &SettingValue) -> Result<()> {
        let mut values = self.values.write().await;
        values
            .entry(owner.clone())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn clear(&self, owner: &CacheOwner) -> Result<()> {
        let mut values = self.values.write().await;
        values.remove(owner);
        Ok(())
    }

    async fn save_job(&self, entry: &JournalEntry) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert((entry.account.clone(), entry.key.clone()), entry.value.clone());
        Ok(())
    }

    async fn remove_job(&self, account: &AccountId, key: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(&(account.clone(), key.to_string()));
        Ok(())
    }

    async fn load_jobs(&self, account: &AccountId) -> Result<Vec<JournalEntry>> {
        let jobs = self.jobs.read().await;
        let mut entries: Vec<JournalEntry> = jobs
            .iter()
            .filter(|((owner, _), _)| owner == account)
            .map(|((owner, key), value)| JournalEntry {
                account: owner.clone(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
