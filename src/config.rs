/// Tunables for the preferences core

use crate::{
    database::DatabaseConfig,
    error::{Error, Result},
    sync::RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Preferences manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Backoff for remote writes
    pub retry: RetryPolicy,
    /// Backoff for the reconcile pull at session start
    pub pull_retry: RetryPolicy,
    /// Where the durable cache lives
    pub database: DatabaseConfig,
    /// Run a background worker that sends queued writes as they become due.
    /// When off, callers drive sync with `flush_pending`.
    pub enable_background_sync: bool,
    /// Longest the worker sleeps without being woken
    pub worker_idle_interval: Duration,
    /// Pull remote values when a session starts
    pub reconcile_on_start: bool,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::network_operations(),
            pull_retry: RetryPolicy::quick_operations(),
            database: DatabaseConfig::default(),
            enable_background_sync: true,
            worker_idle_interval: Duration::from_secs(30),
            reconcile_on_start: true,
        }
    }
}

impl PreferencesConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn check(&self) -> Result<()> {
        for (name, policy) in [("retry", &self.retry), ("pull_retry", &self.pull_retry)] {
            if policy.max_attempts == 0 {
                return Err(Error::Config(format!("{}.max_attempts must be at least 1", name)));
            }
            if !(0.0..=1.0).contains(&policy.jitter_factor) {
                return Err(Error::Config(format!("{}.jitter_factor must be within [0, 1]", name)));
            }
            if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
                return Err(Error::Config(format!("{}.backoff_multiplier must be at least 1", name)));
            }
        }
        if self.worker_idle_interval.is_zero() {
            return Err(Error::Config("worker_idle_interval must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PreferencesConfig::from_json_str(
            r#"{"enable_background_sync": false, "database": {"database_url": "sqlite::memory:"}}"#,
        )
        .unwrap();

        assert!(!config.enable_background_sync);
        assert!(config.database.is_in_memory());
        assert_eq!(config.retry, RetryPolicy::network_operations());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PreferencesConfig::default();
        config.retry.max_attempts = 0;
        let json = config.to_json().unwrap();
        assert!(matches!(PreferencesConfig::from_json_str(&json), Err(Error::Config(_))));

        assert!(matches!(
            PreferencesConfig::from_json_str("{not json"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"reconcile_on_start": false}}"#).unwrap();

        let config = PreferencesConfig::from_file(file.path()).unwrap();
        assert!(!config.reconcile_on_start);

        assert!(matches!(
            PreferencesConfig::from_file("/definitely/not/here.json"),
            Err(Error::Io(_))
        ));
    }
}
