use prefsync::{
    database::DatabaseConfig,
    derived::{effective_font_scale, PlatformContext},
    keys,
    notifier::SettingsConsumer,
    schema::RejectionReason,
    store::{CacheOwner, MemoryCache, PreferenceCache, PreferenceSnapshot},
    sync::{KeySyncStatus, MemoryRemote, RemoteChangeOutcome, RemotePreferencesService, RetryPolicy},
    AccountId, Error, PreferencesConfig, PreferencesManager, Scope, SettingChange, SettingValue, SyncEvent,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_test::assert_ok;

fn alice() -> AccountId {
    AccountId::parse("did:plc:alice").unwrap()
}

fn bob() -> AccountId {
    AccountId::parse("did:web:bob.example.com").unwrap()
}

fn test_config() -> PreferencesConfig {
    PreferencesConfig {
        retry: RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            attempt_timeout: Some(Duration::from_secs(1)),
        },
        pull_retry: RetryPolicy::no_retry(),
        database: DatabaseConfig::in_memory(),
        enable_background_sync: false,
        ..PreferencesConfig::default()
    }
}

async fn manager_with(remote: Arc<MemoryRemote>) -> PreferencesManager {
    PreferencesManager::new(test_config(), remote, Arc::new(MemoryCache::new()))
        .await
        .unwrap()
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Server where another device writes `key` right after each of ours
struct ContendedRemote {
    inner: MemoryRemote,
    key: &'static str,
    other_value: SettingValue,
}

impl ContendedRemote {
    fn new(key: &'static str, other_value: impl Into<SettingValue>) -> Self {
        Self {
            inner: MemoryRemote::new(),
            key,
            other_value: other_value.into(),
        }
    }
}

#[async_trait]
impl RemotePreferencesService for ContendedRemote {
    async fn get_preferences(&self, account: &AccountId) -> prefsync::Result<HashMap<String, SettingValue>> {
        self.inner.get_preferences(account).await
    }

    async fn update_preference(&self, account: &AccountId, key: &str, value: &SettingValue) -> prefsync::Result<()> {
        self.inner.update_preference(account, key, value).await?;
        if key == self.key {
            self.inner.seed(account, key, self.other_value.clone());
        }
        Ok(())
    }
}

/// Records every change it is handed
#[derive(Default)]
struct ThemeEngine {
    seen: Mutex<Vec<SettingValue>>,
}

impl SettingsConsumer for ThemeEngine {
    fn apply_settings(&self, change: &SettingChange, _snapshot: &PreferenceSnapshot) -> prefsync::Result<()> {
        self.seen.lock().unwrap().push(change.new_value.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_theme_change_notifies_and_syncs() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(remote.clone()).await;
    manager.start_session(alice()).await.unwrap();

    let engine = Arc::new(ThemeEngine::default());
    let _handle = manager.subscribe([keys::THEME], &engine);

    assert_ok!(manager.set(keys::THEME, "dark"));
    assert_eq!(manager.get(keys::THEME).unwrap(), SettingValue::from("dark"));
    assert_eq!(*engine.seen.lock().unwrap(), vec![SettingValue::from("dark")]);
    assert_eq!(manager.sync_status(keys::THEME), KeySyncStatus::Pending);

    let report = manager.flush_pending().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(remote.value(&alice(), keys::THEME), Some("dark".into()));
    assert_eq!(manager.sync_status(keys::THEME), KeySyncStatus::Synced);
}

#[tokio::test]
async fn test_rejected_font_size_changes_nothing() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(remote.clone()).await;
    manager.start_session(alice()).await.unwrap();

    let err = manager.set(keys::FONT_SIZE, "ultra").unwrap_err();
    assert!(matches!(err, Error::Validation(RejectionReason::NotAllowed { .. })));
    assert_eq!(manager.get(keys::FONT_SIZE).unwrap(), SettingValue::from("default"));

    assert!(manager.flush_pending().await.unwrap().is_empty());
    assert!(remote.writes().is_empty());
}

#[tokio::test]
async fn test_rapid_toggle_sends_one_write() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(remote.clone()).await;
    manager.start_session(alice()).await.unwrap();

    manager.set(keys::NOTIFY_MENTIONS, true).unwrap();
    manager.set(keys::NOTIFY_MENTIONS, false).unwrap();
    manager.flush_pending().await.unwrap();

    let writes = remote.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].key, keys::NOTIFY_MENTIONS);
    assert_eq!(writes[0].value, SettingValue::Bool(false));
}

#[tokio::test]
async fn test_transient_failures_commit_within_budget() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(remote.clone()).await;
    manager.start_session(alice()).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let log = events.clone();
    manager.on_sync_event(move |event| log.lock().unwrap().push(event.clone()));

    remote.fail_next_updates([
        Error::Timeout("slow".to_string()),
        Error::Remote { status: 429, message: "slow down".to_string() },
    ]);
    manager.set(keys::REPLY_LIKE_THRESHOLD, 3.0).unwrap();
    let report = manager.flush_pending().await.unwrap();

    assert_eq!(report.committed, 1);
    assert!(remote.update_attempts() <= 3);
    let retries = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, SyncEvent::Retrying { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_persistent_failure_is_surfaced() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(remote.clone()).await;
    manager.start_session(alice()).await.unwrap();

    remote.fail_all_updates(Some(Error::Remote { status: 500, message: "boom".to_string() }));
    manager.set(keys::LOGGED_OUT_VISIBILITY, false).unwrap();
    let report = manager.flush_pending().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(remote.update_attempts(), 4);
    assert_eq!(manager.get(keys::LOGGED_OUT_VISIBILITY).unwrap(), SettingValue::Bool(false));
    assert!(matches!(manager.sync_status(keys::LOGGED_OUT_VISIBILITY), KeySyncStatus::Failed { .. }));

    let status = manager.status().await;
    assert_eq!(status.failed_keys.len(), 1);
    assert_eq!(status.pending_writes, 0);
}

#[tokio::test]
async fn test_remote_change_notifies_once_without_echo() {
    let remote = Arc::new(MemoryRemote::new());
    let manager = manager_with(remote.clone()).await;
    manager.start_session(alice()).await.unwrap();

    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let _h = manager.subscribe_fn([keys::CHAT_ALLOW_INCOMING], move |_, _| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    let outcome = manager.on_remote_change(keys::CHAT_ALLOW_INCOMING, "none".into()).unwrap();
    assert_eq!(outcome, RemoteChangeOutcome::Applied);
    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(manager.flush_pending().await.unwrap().is_empty());
    assert!(remote.writes().is_empty());
}

#[tokio::test]
async fn test_local_precedence_then_recheck() {
    let remote = Arc::new(ContendedRemote::new(keys::DARK_THEME, "dim"));
    let manager = PreferencesManager::new(test_config(), remote.clone(), Arc::new(MemoryCache::new()))
        .await
        .unwrap();
    manager.start_session(alice()).await.unwrap();

    manager.set(keys::DARK_THEME, "dark").unwrap();
    let outcome = manager.on_remote_change(keys::DARK_THEME, "dim".into()).unwrap();
    assert_eq!(outcome, RemoteChangeOutcome::Deferred);
    assert_eq!(manager.get(keys::DARK_THEME).unwrap(), SettingValue::from("dark"));

    // Our write commits, then the other device's value wins on re-check
    let report = manager.flush_pending().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(remote.inner.value(&alice(), keys::DARK_THEME), Some("dim".into()));
    assert_eq!(manager.get(keys::DARK_THEME).unwrap(), SettingValue::from("dim"));
    assert_eq!(manager.sync_engine().pending_count(), 0);
    assert!(manager.sync_engine().recheck_keys().is_empty());
}

#[tokio::test]
async fn test_recheck_survives_failed_pull() {
    let remote = Arc::new(ContendedRemote::new(keys::DARK_THEME, "dim"));
    let manager = PreferencesManager::new(test_config(), remote.clone(), Arc::new(MemoryCache::new()))
        .await
        .unwrap();
    manager.start_session(alice()).await.unwrap();

    manager.set(keys::DARK_THEME, "dark").unwrap();
    manager.on_remote_change(keys::DARK_THEME, "dim".into()).unwrap();
    remote.inner.fail_next_pulls([Error::Connection("offline".to_string())]);

    assert!(matches!(manager.flush_pending().await, Err(Error::Connection(_))));
    assert_eq!(manager.get(keys::DARK_THEME).unwrap(), SettingValue::from("dark"));
    assert_eq!(manager.sync_engine().recheck_keys(), vec![keys::DARK_THEME.to_string()]);

    let report = manager.flush_pending().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(manager.get(keys::DARK_THEME).unwrap(), SettingValue::from("dim"));
}

#[tokio::test]
async fn test_background_worker_rechecks_deferred_value() {
    let remote = Arc::new(ContendedRemote::new(keys::THEME, "light"));
    let config = PreferencesConfig {
        enable_background_sync: true,
        worker_idle_interval: Duration::from_millis(50),
        ..test_config()
    };
    let manager = PreferencesManager::new(config, remote.clone(), Arc::new(MemoryCache::new()))
        .await
        .unwrap();
    manager.start_session(alice()).await.unwrap();

    manager.set(keys::THEME, "dark").unwrap();
    // Arrives before the worker has claimed the write
    let outcome = manager.on_remote_change(keys::THEME, "light".into()).unwrap();
    assert_eq!(outcome, RemoteChangeOutcome::Deferred);

    assert!(eventually(|| manager.get(keys::THEME).ok() == Some("light".into())).await);
    assert_eq!(remote.inner.writes().len(), 1);
    assert!(manager.sync_engine().recheck_keys().is_empty());
    manager.shutdown().await;
}

#[tokio::test]
async fn test_abandoned_flush_leaves_queue_usable() {
    let remote = Arc::new(MemoryRemote::new().with_latency(Duration::from_millis(100)));
    let manager = manager_with(remote.clone()).await;
    manager.start_session(alice()).await.unwrap();

    manager.set(keys::THEME, "dark").unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(20), manager.flush_pending())
        .await
        .is_err());

    manager.set(keys::THEME, "light").unwrap();
    let flushed = tokio::time::timeout(Duration::from_secs(2), manager.flush_pending()).await;
    assert_ok!(assert_ok!(flushed));
    assert_eq!(remote.value(&alice(), keys::THEME), Some("light".into()));
    assert_eq!(manager.sync_status(keys::THEME), KeySyncStatus::Synced);
}

#[tokio::test]
async fn test_reset_to_defaults_reads_back_defaults() {
    let manager = manager_with(Arc::new(MemoryRemote::new())).await;
    manager.start_session(alice()).await.unwrap();

    manager.set(keys::THEME, "light").unwrap();
    manager.set(keys::AUTOPLAY, false).unwrap();
    manager.set(keys::PRIMARY_LANGUAGE, "pt-BR").unwrap();

    manager.reset_to_defaults(None).unwrap();
    let schema = prefsync::Schema::builtin();
    for setting in schema.settings() {
        assert_eq!(manager.get(&setting.key).unwrap(), setting.default, "{}", setting.key);
    }
}

#[tokio::test]
async fn test_account_switch_keeps_device_settings() {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(&bob(), keys::THEME, "light");
    let manager = manager_with(remote.clone()).await;

    manager.start_session(alice()).await.unwrap();
    manager.set(keys::THEME, "dark").unwrap();
    manager.set(keys::REDUCE_MOTION, true).unwrap();
    manager.flush_pending().await.unwrap();

    manager.switch_account(bob()).await.unwrap();
    assert_eq!(manager.get(keys::THEME).unwrap(), SettingValue::from("light"));
    assert_eq!(manager.get(keys::REDUCE_MOTION).unwrap(), SettingValue::Bool(true));

    manager.switch_account(alice()).await.unwrap();
    assert_eq!(manager.get(keys::THEME).unwrap(), SettingValue::from("dark"));

    manager.end_session().await.unwrap();
    assert_eq!(manager.get(keys::THEME).unwrap(), SettingValue::from("system"));
    assert_eq!(manager.get(keys::REDUCE_MOTION).unwrap(), SettingValue::Bool(true));
}

#[tokio::test]
async fn test_unsent_writes_resume_next_session() {
    let remote = Arc::new(MemoryRemote::new());
    let cache = Arc::new(MemoryCache::new());

    {
        let manager = PreferencesManager::new(test_config(), remote.clone(), cache.clone())
            .await
            .unwrap();
        manager.start_session(alice()).await.unwrap();
        manager.set(keys::NOTIFY_QUOTES, false).unwrap();
        manager.shutdown().await;
    }
    assert_eq!(cache.load_jobs(&alice()).await.unwrap().len(), 1);

    let manager = PreferencesManager::new(test_config(), remote.clone(), cache.clone())
        .await
        .unwrap();
    manager.start_session(alice()).await.unwrap();
    assert_eq!(manager.get(keys::NOTIFY_QUOTES).unwrap(), SettingValue::Bool(false));

    let report = manager.flush_pending().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(remote.value(&alice(), keys::NOTIFY_QUOTES), Some(false.into()));
    assert!(cache.load_jobs(&alice()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sqlite_cache_restores_device_settings() {
    let dir = tempfile::tempdir().unwrap();
    let config = PreferencesConfig {
        database: DatabaseConfig::file(dir.path().join("prefs.db")),
        ..test_config()
    };
    let remote = Arc::new(MemoryRemote::new());

    {
        let manager = PreferencesManager::open(config.clone(), remote.clone()).await.unwrap();
        manager.set(keys::FONT_FAMILY, "system").unwrap();
        manager.set(keys::VERBOSE_LOGGING, true).unwrap();
        manager.sync_cache().await;
        manager.shutdown().await;
    }

    let manager = PreferencesManager::open(config, remote).await.unwrap();
    assert_eq!(manager.get(keys::FONT_FAMILY).unwrap(), SettingValue::from("system"));
    assert_eq!(manager.get(keys::VERBOSE_LOGGING).unwrap(), SettingValue::Bool(true));
    assert_eq!(manager.get(keys::THEME).unwrap(), SettingValue::from("system"));
}

#[tokio::test]
async fn test_background_worker_commits() {
    let remote = Arc::new(MemoryRemote::new());
    let config = PreferencesConfig {
        enable_background_sync: true,
        worker_idle_interval: Duration::from_millis(50),
        ..test_config()
    };
    let manager = PreferencesManager::new(config, remote.clone(), Arc::new(MemoryCache::new()))
        .await
        .unwrap();
    manager.start_session(alice()).await.unwrap();
    assert!(manager.status().await.background_sync);

    manager.set(keys::NOTIFY_FOLLOWS, false).unwrap();
    for _ in 0..200 {
        if !remote.writes().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(remote.value(&alice(), keys::NOTIFY_FOLLOWS), Some(false.into()));
    manager.shutdown().await;
}

#[tokio::test]
async fn test_font_consumer_sees_new_scale() {
    let manager = manager_with(Arc::new(MemoryRemote::new())).await;
    let platform = PlatformContext::default().with_text_scale(1.5);

    let scales = Arc::new(Mutex::new(Vec::new()));
    let log = scales.clone();
    let _h = manager.subscribe_fn([keys::FONT_SIZE], move |_, snapshot| {
        log.lock().unwrap().push(effective_font_scale(snapshot, &platform));
        Ok(())
    });

    // No session: synced keys still apply locally
    manager.set(keys::FONT_SIZE, "small").unwrap();
    let recorded = scales.lock().unwrap().clone();
    assert_eq!(recorded.len(), 1);
    assert!((recorded[0] - 0.875 * 1.5).abs() < 1e-9);
    assert_eq!(manager.sync_engine().pending_count(), 0);
}

#[tokio::test]
async fn test_cache_written_behind_per_owner() {
    let cache = Arc::new(MemoryCache::new());
    let manager = PreferencesManager::new(test_config(), Arc::new(MemoryRemote::new()), cache.clone())
        .await
        .unwrap();
    manager.start_session(alice()).await.unwrap();

    manager.set(keys::THEME, "dark").unwrap();
    manager.set(keys::AUTOPLAY, false).unwrap();
    manager.sync_cache().await;

    let account = cache.load(&CacheOwner::Account(alice())).await.unwrap();
    let device = cache.load(&CacheOwner::Device).await.unwrap();
    assert_eq!(account.get(keys::THEME), Some(&SettingValue::from("dark")));
    assert!(!account.contains_key(keys::AUTOPLAY));
    assert_eq!(device.get(keys::AUTOPLAY), Some(&SettingValue::Bool(false)));

    assert_eq!(manager.store().schema().scope_of(keys::AUTOPLAY), Some(Scope::LocalOnly));
}
