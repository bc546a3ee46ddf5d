use crate::{
    error::{Error, Result},
    types::{AccountId, SettingValue},
};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
    time::Duration,
};
use tracing::trace;

/// The server side of preference sync
#[async_trait]
pub trait RemotePreferencesService: Send + Sync {
    /// Every synced value the service holds for `account`
    async fn get_preferences(&self, account: &AccountId) -> Result<HashMap<String, SettingValue>>;

    /// Write one value
    async fn update_preference(&self, account: &AccountId, key: &str, value: &SettingValue) -> Result<()>;
}

/// A write the in-memory service accepted
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWrite {
    pub account: AccountId,
    pub key: String,
    pub value: SettingValue,
}

/// In-process preferences service with scripted failures
#[derive(Default)]
pub struct MemoryRemote {
    values: Mutex<HashMap<AccountId, HashMap<String, SettingValue>>>,
    update_failures: Mutex<VecDeque<Error>>,
    persistent_failure: Mutex<Option<Error>>,
    pull_failures: Mutex<VecDeque<Error>>,
    writes: Mutex<Vec<RemoteWrite>>,
    update_attempts: AtomicU32,
    latency: Option<Duration>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store a value server-side without recording it as a client write
    pub fn seed(&self, account: &AccountId, key: &str, value: impl Into<SettingValue>) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values
            .entry(account.clone())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn value(&self, account: &AccountId, key: &str) -> Option<SettingValue> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(account).and_then(|v| v.get(key)).cloned()
    }

    /// Fail the next `update_preference` calls with these errors, in order
    pub fn fail_next_updates(&self, errors: impl IntoIterator<Item = Error>) {
        let mut failures = self.update_failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.extend(errors);
    }

    /// Fail every `update_preference` call with `error` until cleared
    pub fn fail_all_updates(&self, error: Option<Error>) {
        *self.persistent_failure.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }

    /// Fail the next `get_preferences` calls with these errors, in order
    pub fn fail_next_pulls(&self, errors: impl IntoIterator<Item = Error>) {
        let mut failures = self.pull_failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.extend(errors);
    }

    /// Writes accepted so far, oldest first
    pub fn writes(&self) -> Vec<RemoteWrite> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `update_preference` calls, failed ones included
    pub fn update_attempts(&self) -> u32 {
        self.update_attempts.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemotePreferencesService for MemoryRemote {
    async fn get_preferences(&self, account: &AccountId) -> Result<HashMap<String, SettingValue>> {
        self.simulate_latency().await;

        if let Some(error) = self.pull_failures.lock().unwrap_or_else(|e| e.into_inner()).pop_front() {
            return Err(error);
        }

        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(account).cloned().unwrap_or_default())
    }

    async fn update_preference(&self, account: &AccountId, key: &str, value: &SettingValue) -> Result<()> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let scripted = self.update_failures.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        if let Some(error) = scripted {
            trace!("Scripted failure for {} on {}: {}", key, account, error);
            return Err(error);
        }
        if let Some(error) = self.persistent_failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(error);
        }

        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(account.clone())
            .or_default()
            .insert(key.to_string(), value.clone());
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).push(RemoteWrite {
            account: account.clone(),
            key: key.to_string(),
            value: value.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let remote = MemoryRemote::new();
        let alice = AccountId::parse("did:plc:alice").unwrap();
        remote.fail_next_updates([Error::Remote { status: 503, message: "unavailable".to_string() }]);

        let value = SettingValue::from("dark");
        assert!(remote.update_preference(&alice, "display.theme", &value).await.is_err());
        assert!(remote.update_preference(&alice, "display.theme", &value).await.is_ok());

        assert_eq!(remote.update_attempts(), 2);
        assert_eq!(remote.writes().len(), 1);
        assert_eq!(remote.value(&alice, "display.theme"), Some(value));
    }

    #[tokio::test]
    async fn test_accounts_are_separate() {
        let remote = MemoryRemote::new();
        let alice = AccountId::parse("did:plc:alice").unwrap();
        let bob = AccountId::parse("did:plc:bob").unwrap();
        remote.seed(&alice, "display.theme", "light");

        assert_eq!(remote.get_preferences(&alice).await.unwrap().len(), 1);
        assert!(remote.get_preferences(&bob).await.unwrap().is_empty());
        assert!(remote.writes().is_empty());
    }
}
