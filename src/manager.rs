/// Preferences manager: wires the store, sync engine and durable cache
/// together and owns the session lifecycle.
///
/// Device-local settings are loaded once when the manager is created and
/// survive account switches. Synced settings belong to the active account:
/// they are hydrated from the cache when a session starts, reconciled
/// against the remote service, and dropped back to defaults when it ends.

use crate::{
    config::PreferencesConfig,
    database::{Database, SqlitePreferenceCache},
    error::{Error, Result},
    notifier::{SettingsConsumer, SubscriptionHandle},
    schema::{Schema, Scope},
    store::{CacheOwner, CacheWriter, LocalStore, PreferenceCache, PreferenceSnapshot},
    sync::{
        retry_operation, FlushReport, KeySyncStatus, RemoteChangeOutcome, RemotePreferencesService,
        RemoteSyncEngine, SyncJob, SyncStatistics,
    },
    types::{AccountId, SettingChange, SettingValue, SyncEvent},
};
use std::{collections::HashMap, sync::Arc, time::SystemTime};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

/// Result of pulling remote values into the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    pub unchanged: usize,
    pub deferred: usize,
    pub ignored: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: RemoteChangeOutcome) {
        match outcome {
            RemoteChangeOutcome::Applied => self.applied += 1,
            RemoteChangeOutcome::Unchanged => self.unchanged += 1,
            RemoteChangeOutcome::Deferred => self.deferred += 1,
            RemoteChangeOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Manager status
#[derive(Debug, Clone)]
pub struct ManagerStatus {
    pub account: Option<AccountId>,
    pub background_sync: bool,
    pub pending_writes: usize,
    pub failed_keys: Vec<(String, String)>,
    pub statistics: SyncStatistics,
    pub session_started_at: Option<SystemTime>,
}

#[derive(Default)]
struct SessionState {
    account: Option<AccountId>,
    worker: Option<JoinHandle<()>>,
    started_at: Option<SystemTime>,
}

pub struct PreferencesManager {
    config: PreferencesConfig,
    store: Arc<LocalStore>,
    engine: Arc<RemoteSyncEngine>,
    cache: Arc<dyn PreferenceCache>,
    writer: CacheWriter,
    _writer_task: JoinHandle<()>,
    _database: Option<Database>,
    session: Mutex<SessionState>,
}

impl PreferencesManager {
    /// Create a manager over the built-in schema and load device-local
    /// settings from `cache`
    pub async fn new(
        config: PreferencesConfig,
        remote: Arc<dyn RemotePreferencesService>,
        cache: Arc<dyn PreferenceCache>,
    ) -> Result<Self> {
        Self::with_schema(config, Schema::builtin(), remote, cache).await
    }

    /// Create a manager with the SQLite cache described by `config.database`
    pub async fn open(config: PreferencesConfig, remote: Arc<dyn RemotePreferencesService>) -> Result<Self> {
        let database = Database::new(config.database.clone()).await?;
        let cache = Arc::new(SqlitePreferenceCache::new(database.pool().clone()));

        let mut manager = Self::with_schema(config, Schema::builtin(), remote, cache).await?;
        manager._database = Some(database);
        Ok(manager)
    }

    pub async fn with_schema(
        config: PreferencesConfig,
        schema: Arc<Schema>,
        remote: Arc<dyn RemotePreferencesService>,
        cache: Arc<dyn PreferenceCache>,
    ) -> Result<Self> {
        let (writer, writer_task) = CacheWriter::spawn(cache.clone());

        let engine = Arc::new(RemoteSyncEngine::new(remote, config.retry.clone()).with_journal(writer.clone()));
        let store = Arc::new(
            LocalStore::new(schema)
                .with_sync_engine(engine.clone())
                .with_cache_writer(writer.clone()),
        );

        let device_values = cache.load(&CacheOwner::Device).await?;
        let changed = store.hydrate(Scope::LocalOnly, &device_values)?;
        debug!("Loaded {} device-local settings from cache", changed);

        Ok(Self {
            config,
            store,
            engine,
            cache,
            writer,
            _writer_task: writer_task,
            _database: None,
            session: Mutex::new(SessionState::default()),
        })
    }

    pub fn config(&self) -> &PreferencesConfig {
        &self.config
    }

    /// Shared store handle for dependents
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn sync_engine(&self) -> &Arc<RemoteSyncEngine> {
        &self.engine
    }

    /// Begin a session for `account`: load its cached synced settings,
    /// resume journaled writes, reconcile against the remote service, and
    /// start the background worker.
    ///
    /// A failed reconcile is logged and does not fail the session; the
    /// cached values stay in effect.
    pub async fn start_session(&self, account: AccountId) -> Result<()> {
        let mut session = self.session.lock().await;

        match session.account.clone() {
            Some(current) if current == account => {
                debug!("Session for {} already active", account);
                return Ok(());
            }
            Some(current) => {
                info!("Switching preferences from {} to {}", current, account);
                self.stop_session(&mut session).await;
            }
            None => info!("Starting preferences session for {}", account),
        }

        // Cached values for this account may still be in the writer queue
        self.writer.barrier().await;

        self.store.set_account(Some(account.clone()));
        let cached = self.cache.load(&CacheOwner::Account(account.clone())).await?;
        self.store.hydrate(Scope::Synced, &cached)?;

        let resumed = self.resume_journal(&account).await?;
        if resumed > 0 {
            info!("Resumed {} unsent write(s) for {}", resumed, account);
        }

        session.account = Some(account.clone());
        session.started_at = Some(SystemTime::now());

        if self.config.reconcile_on_start {
            match self.pull(&account).await {
                Ok(report) => debug!("Reconciled {}: {:?}", account, report),
                Err(e) => warn!("Reconcile for {} failed, keeping cached values: {}", account, e),
            }
        }

        if self.config.enable_background_sync {
            session.worker = Some(self.engine.spawn_worker(&self.store, self.config.worker_idle_interval));
        }

        Ok(())
    }

    /// Move the session to another account. Device-local settings are kept.
    pub async fn switch_account(&self, account: AccountId) -> Result<()> {
        self.start_session(account).await
    }

    /// End the session (logout). Queued writes are dropped from memory but
    /// stay journaled, and synced settings fall back to their defaults.
    pub async fn end_session(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.account.is_none() {
            return Ok(());
        }
        self.stop_session(&mut session).await;
        self.store.hydrate(Scope::Synced, &HashMap::new())?;
        Ok(())
    }

    async fn stop_session(&self, session: &mut SessionState) {
        if let Some(worker) = session.worker.take() {
            worker.abort();
        }
        let dropped = self.engine.cancel_all();
        if let Some(account) = session.account.take() {
            info!("Ended preferences session for {} ({} write(s) left journaled)", account, dropped);
        }
        session.started_at = None;
        self.store.set_account(None);
        self.writer.barrier().await;
    }

    async fn resume_journal(&self, account: &AccountId) -> Result<usize> {
        let entries = self.cache.load_jobs(account).await?;
        let mut resumed = 0;

        for entry in entries {
            let valid = self.store.schema().scope_of(&entry.key) == Some(Scope::Synced)
                && self.store.schema().validate(&entry.key, entry.value.clone()).is_ok();
            if !valid {
                warn!("Discarding journaled write of {} for {}", entry.key, account);
                self.writer.remove_job(account.clone(), &entry.key);
                continue;
            }

            self.engine.enqueue(SyncJob::new(entry.account, &entry.key, entry.value));
            resumed += 1;
        }

        Ok(resumed)
    }

    async fn active_account(&self) -> Result<AccountId> {
        self.session.lock().await.account.clone().ok_or(Error::NoActiveSession)
    }

    async fn pull(&self, account: &AccountId) -> Result<ReconcileReport> {
        let remote = self.engine.remote().clone();
        let values = retry_operation(
            |_attempt| {
                let remote = remote.clone();
                let account = account.clone();
                async move { remote.get_preferences(&account).await }
            },
            self.config.pull_retry.clone(),
        )
        .await?;

        let mut report = ReconcileReport::default();
        for (key, value) in values {
            report.record(self.engine.on_remote_change(&self.store, &key, value)?);
        }
        Ok(report)
    }

    /// Pull every remote value for the active account and apply it under
    /// the conflict policy
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let account = self.active_account().await?;
        self.pull(&account).await
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Result<SettingValue> {
        self.store.get(key)
    }

    /// Validate and apply a local change
    pub fn set(&self, key: &str, value: impl Into<SettingValue>) -> Result<()> {
        self.store.set(key, value)
    }

    pub fn snapshot(&self) -> Arc<PreferenceSnapshot> {
        self.store.snapshot()
    }

    pub fn reset_to_defaults(&self, scope: Option<Scope>) -> Result<Arc<PreferenceSnapshot>> {
        self.store.reset_to_defaults(scope)
    }

    /// Apply a value pushed by the remote service
    pub fn on_remote_change(&self, key: &str, value: SettingValue) -> Result<RemoteChangeOutcome> {
        self.engine.on_remote_change(&self.store, key, value)
    }

    pub fn subscribe<I, S, C>(&self, keys: I, consumer: &Arc<C>) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        C: SettingsConsumer + 'static,
    {
        self.store.subscribe(keys, consumer)
    }

    pub fn subscribe_fn<I, S, F>(&self, keys: I, handler: F) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&SettingChange, &PreferenceSnapshot) -> Result<()> + Send + Sync + 'static,
    {
        self.store.subscribe_fn(keys, handler)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.store.unsubscribe(handle)
    }

    /// Register a handler for sync progress events
    pub fn on_sync_event<F>(&self, handler: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.engine.add_event_handler(handler);
    }

    /// Send every queued write, waiting out backoff, then re-check keys
    /// whose remote value was deferred while they were pending. Returns
    /// once the cache has caught up.
    ///
    /// If the re-check pull fails the error is returned and the keys are
    /// re-checked on the next flush or worker pass.
    pub async fn flush_pending(&self) -> Result<FlushReport> {
        let report = self.engine.flush_pending().await;
        let rechecked = self.engine.recheck(&self.store).await;
        self.writer.barrier().await;

        let applied = rechecked?;
        if applied > 0 {
            debug!("Re-check applied {} remote value(s)", applied);
        }
        Ok(report)
    }

    pub fn sync_status(&self, key: &str) -> KeySyncStatus {
        self.engine.status(key)
    }

    /// Wait until every cache write issued so far has landed
    pub async fn sync_cache(&self) {
        self.writer.barrier().await;
    }

    pub async fn status(&self) -> ManagerStatus {
        let session = self.session.lock().await;
        ManagerStatus {
            account: session.account.clone(),
            background_sync: session.worker.is_some(),
            pending_writes: self.engine.pending_count(),
            failed_keys: self.engine.failed_keys(),
            statistics: self.engine.statistics(),
            session_started_at: session.started_at,
        }
    }

    /// Stop background work and wait for the cache to catch up. Queued
    /// writes are dropped from memory and stay journaled; sends already in
    /// flight finish on their own and their results are discarded.
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        if let Some(worker) = session.worker.take() {
            worker.abort();
        }
        let dropped = self.engine.cancel_all();
        if dropped > 0 {
            debug!("{} write(s) left journaled at shutdown", dropped);
        }
        self.writer.barrier().await;
        info!("Preferences manager shut down");
    }
}
