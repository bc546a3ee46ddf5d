/// The canonical in-memory preference state.
///
/// All mutations are serialized through one lock; each one validates,
/// swaps in a new snapshot, notifies consumers, and (for synced keys set
/// locally) hands a job to the sync engine before `set` returns. Reads
/// never wait on a mutation in progress beyond the snapshot swap.
use crate::{
    error::{Error, Result},
    notifier::{self, ChangeNotifier, SettingsConsumer, SubscriptionHandle},
    schema::{RejectionReason, Schema, Scope},
    store::{CacheOwner, CacheWriter, PreferenceSnapshot},
    sync::{RemoteSyncEngine, SyncJob},
    types::{AccountId, ChangeOrigin, SettingChange, SettingValue},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};
use tracing::{debug, trace, warn};

pub struct LocalStore {
    schema: Arc<Schema>,
    notifier: Arc<ChangeNotifier>,
    snapshot: RwLock<Arc<PreferenceSnapshot>>,
    account: RwLock<Option<AccountId>>,
    mutation: Mutex<()>,
    sync_engine: Option<Arc<RemoteSyncEngine>>,
    cache_writer: Option<CacheWriter>,
}

impl LocalStore {
    /// Create a store holding the schema defaults
    pub fn new(schema: Arc<Schema>) -> Self {
        let snapshot = Arc::new(PreferenceSnapshot::from_defaults(&schema));
        Self {
            schema,
            notifier: Arc::new(ChangeNotifier::new()),
            snapshot: RwLock::new(snapshot),
            account: RwLock::new(None),
            mutation: Mutex::new(()),
            sync_engine: None,
            cache_writer: None,
        }
    }

    /// Route synced-key mutations to `engine`
    pub fn with_sync_engine(mut self, engine: Arc<RemoteSyncEngine>) -> Self {
        self.sync_engine = Some(engine);
        self
    }

    /// Write every applied mutation behind to the durable cache
    pub fn with_cache_writer(mut self, writer: CacheWriter) -> Self {
        self.cache_writer = Some(writer);
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Account that synced settings currently belong to
    pub fn account(&self) -> Option<AccountId> {
        self.account.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Switch which account synced mutations are attributed to. Values are
    /// not touched; reload them with [`LocalStore::hydrate`].
    pub fn set_account(&self, account: Option<AccountId>) {
        let _serial = self.mutation.lock().unwrap_or_else(|e| e.into_inner());
        *self.account.write().unwrap_or_else(|e| e.into_inner()) = account;
    }

    /// Current canonical snapshot
    pub fn snapshot(&self) -> Arc<PreferenceSnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Result<SettingValue> {
        let setting = self
            .schema
            .get(key)
            .ok_or_else(|| RejectionReason::UnknownKey(key.to_string()))?;

        let snapshot = self.snapshot();
        Ok(snapshot
            .get(key)
            .cloned()
            .unwrap_or_else(|| setting.default.clone()))
    }

    /// Validate and apply a local mutation.
    ///
    /// On rejection nothing changes. Setting the value a key already holds
    /// is a no-op.
    pub fn set(&self, key: &str, value: impl Into<SettingValue>) -> Result<()> {
        self.apply(key, value.into(), ChangeOrigin::Local, || false)
            .map(|_| ())
    }

    /// Reset every setting (or only those in `scope`) to its default, one
    /// validated and notified mutation at a time.
    pub fn reset_to_defaults(&self, scope: Option<Scope>) -> Result<Arc<PreferenceSnapshot>> {
        let defaults: Vec<(String, SettingValue)> = self
            .schema
            .settings_in(scope)
            .map(|s| (s.key.clone(), s.default.clone()))
            .collect();

        let mut changed = 0;
        for (key, value) in defaults {
            if self.apply(&key, value, ChangeOrigin::Reset, || false)? {
                changed += 1;
            }
        }
        debug!("Reset {} settings to defaults (scope: {:?})", changed, scope);

        Ok(self.snapshot())
    }

    /// Apply a value that came from the remote service. Never enqueues a
    /// sync job. Returns whether the stored value changed.
    pub fn apply_remote(&self, key: &str, value: SettingValue) -> Result<bool> {
        self.apply(key, value, ChangeOrigin::Remote, || false)
    }

    /// Like [`LocalStore::apply_remote`], but `skip` is evaluated under the
    /// mutation lock and the write is abandoned when it returns true.
    pub(crate) fn apply_remote_unless<F>(&self, key: &str, value: SettingValue, skip: F) -> Result<bool>
    where
        F: FnOnce() -> bool,
    {
        self.apply(key, value, ChangeOrigin::Remote, skip)
    }

    /// Load values for every setting in `scope` from `values`, falling back
    /// to defaults for missing or invalid entries. Consumers are notified of
    /// keys that changed; nothing is enqueued or written back.
    pub fn hydrate(&self, scope: Scope, values: &HashMap<String, SettingValue>) -> Result<usize> {
        let targets: Vec<(String, SettingValue)> = self
            .schema
            .settings_in(Some(scope))
            .map(|setting| {
                let value = match values.get(&setting.key) {
                    Some(cached) => match self.schema.validate(&setting.key, cached.clone()) {
                        Ok(valid) => valid,
                        Err(reason) => {
                            warn!("Ignoring cached value for {}: {}", setting.key, reason);
                            setting.default.clone()
                        }
                    },
                    None => setting.default.clone(),
                };
                (setting.key.clone(), value)
            })
            .collect();

        let mut changed = 0;
        for (key, value) in targets {
            if self.apply(&key, value, ChangeOrigin::Hydrate, || false)? {
                changed += 1;
            }
        }
        debug!("Hydrated {:?} settings, {} changed", scope, changed);
        Ok(changed)
    }

    /// Register a consumer (held weakly) for `keys`
    pub fn subscribe<I, S, C>(&self, keys: I, consumer: &Arc<C>) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        C: SettingsConsumer + 'static,
    {
        self.notifier.subscribe(keys, consumer)
    }

    /// Register a closure for `keys`; it lives as long as the handle
    pub fn subscribe_fn<I, S, F>(&self, keys: I, handler: F) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&SettingChange, &PreferenceSnapshot) -> Result<()> + Send + Sync + 'static,
    {
        self.notifier.subscribe_fn(keys, handler)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.notifier.unsubscribe(handle)
    }

    fn apply<F>(&self, key: &str, value: SettingValue, origin: ChangeOrigin, skip: F) -> Result<bool>
    where
        F: FnOnce() -> bool,
    {
        if notifier::is_dispatching() {
            return Err(Error::ReentrantMutation(key.to_string()));
        }

        let validated = self.schema.validate(key, value)?;
        let scope = self
            .schema
            .scope_of(key)
            .ok_or_else(|| RejectionReason::UnknownKey(key.to_string()))?;

        let _serial = self.mutation.lock().unwrap_or_else(|e| e.into_inner());

        if skip() {
            trace!("Mutation of {} skipped by precondition", key);
            return Ok(false);
        }

        let current = self.snapshot();
        if current.get(key) == Some(&validated) {
            trace!("{} already holds {}, nothing to do", key, validated);
            return Ok(false);
        }

        let old_value = current
            .get(key)
            .cloned()
            .unwrap_or_else(|| validated.clone());
        let next = Arc::new(current.with_value(key, validated.clone()));
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = next.clone();

        let account = self.account();
        let owner = match (scope, &account) {
            (Scope::LocalOnly, _) => Some(CacheOwner::Device),
            (Scope::Synced, Some(account)) => Some(CacheOwner::Account(account.clone())),
            (Scope::Synced, None) => None,
        };
        if origin != ChangeOrigin::Hydrate {
            if let (Some(writer), Some(owner)) = (&self.cache_writer, owner) {
                writer.save(owner, key, validated.clone());
            }
        }

        let change = SettingChange {
            key: key.to_string(),
            old_value,
            new_value: validated.clone(),
            origin,
            revision: next.revision(),
        };
        debug!("{} = {} ({:?}, revision {})", key, validated, origin, next.revision());
        self.notifier.notify(&change, &next);

        let locally_originated = matches!(origin, ChangeOrigin::Local | ChangeOrigin::Reset);
        if scope == Scope::Synced && locally_originated {
            match (&self.sync_engine, account) {
                (Some(engine), Some(account)) => {
                    engine.enqueue(SyncJob::new(account, key, validated));
                }
                (Some(_), None) => {
                    debug!("No active account, {} stays local until sign-in", key);
                }
                (None, _) => {}
            }
        }

        Ok(true)
    }
}
