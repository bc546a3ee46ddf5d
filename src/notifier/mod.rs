/// Change notification fan-out
///
/// Consumers (font engine, theme engine, notification engine, content
/// filter) register for a set of keys and are called synchronously, in
/// registration order, after each applied mutation. Registrations hold the
/// consumer weakly: dropping the consumer deregisters it.

use crate::{
    error::Result,
    store::PreferenceSnapshot,
    types::SettingChange,
};
use std::{
    cell::Cell,
    collections::HashSet,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, RwLock, Weak},
};
use tracing::{debug, warn};
use uuid::Uuid;

thread_local! {
    static DISPATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// True while the current thread is inside a consumer callback
pub(crate) fn is_dispatching() -> bool {
    DISPATCH_DEPTH.with(|depth| depth.get() > 0)
}

struct DispatchGuard;

impl DispatchGuard {
    fn enter() -> Self {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        DispatchGuard
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// A dependent component reacting to setting changes
pub trait SettingsConsumer: Send + Sync {
    /// Apply a change. `snapshot` is the complete state after the change.
    fn apply_settings(&self, change: &SettingChange, snapshot: &PreferenceSnapshot) -> Result<()>;
}

struct FnConsumer<F>(F);

impl<F> SettingsConsumer for FnConsumer<F>
where
    F: Fn(&SettingChange, &PreferenceSnapshot) -> Result<()> + Send + Sync,
{
    fn apply_settings(&self, change: &SettingChange, snapshot: &PreferenceSnapshot) -> Result<()> {
        (self.0)(change, snapshot)
    }
}

/// Returned by `subscribe`; pass to `unsubscribe` to deregister early.
///
/// For closure subscriptions the handle owns the closure, so dropping the
/// handle also ends the subscription.
#[must_use = "dropping a closure subscription handle ends the subscription"]
pub struct SubscriptionHandle {
    id: Uuid,
    _owned: Option<Arc<dyn SettingsConsumer>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("owned", &self._owned.is_some())
            .finish()
    }
}

struct Registration {
    id: Uuid,
    keys: HashSet<String>,
    consumer: Weak<dyn SettingsConsumer>,
}

/// Outcome of one dispatch cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Registry of consumers keyed by setting key
#[derive(Default)]
pub struct ChangeNotifier {
    registrations: RwLock<Vec<Registration>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` for `keys`. The consumer is held weakly.
    pub fn subscribe<I, S, C>(&self, keys: I, consumer: &Arc<C>) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        C: SettingsConsumer + 'static,
    {
        let consumer: Arc<dyn SettingsConsumer> = consumer.clone();
        let id = self.register(keys, Arc::downgrade(&consumer));
        SubscriptionHandle { id, _owned: None }
    }

    /// Register a closure for `keys`. The closure lives as long as the handle.
    pub fn subscribe_fn<I, S, F>(&self, keys: I, handler: F) -> SubscriptionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&SettingChange, &PreferenceSnapshot) -> Result<()> + Send + Sync + 'static,
    {
        let consumer: Arc<dyn SettingsConsumer> = Arc::new(FnConsumer(handler));
        let id = self.register(keys, Arc::downgrade(&consumer));
        SubscriptionHandle {
            id,
            _owned: Some(consumer),
        }
    }

    fn register<I, S>(&self, keys: I, consumer: Weak<dyn SettingsConsumer>) -> Uuid
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = Uuid::new_v4();
        let keys: HashSet<String> = keys.into_iter().map(Into::into).collect();
        debug!("Registering consumer {} for {} keys", id, keys.len());

        let mut registrations = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        registrations.push(Registration { id, keys, consumer });
        id
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut registrations = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        let before = registrations.len();
        registrations.retain(|r| r.id != handle.id);
        registrations.len() != before
    }

    /// Number of registrations whose consumer is still alive
    pub fn subscriber_count(&self) -> usize {
        let registrations = self.registrations.read().unwrap_or_else(|e| e.into_inner());
        registrations
            .iter()
            .filter(|r| r.consumer.strong_count() > 0)
            .count()
    }

    /// Deliver `change` to every live consumer registered for its key.
    ///
    /// The registry lock is released before any consumer runs. A consumer
    /// that errors or panics is logged and skipped.
    pub fn notify(&self, change: &SettingChange, snapshot: &PreferenceSnapshot) -> DispatchReport {
        let targets = self.targets_for(&change.key);
        let mut report = DispatchReport::default();

        for (id, consumer) in targets {
            let _guard = DispatchGuard::enter();
            let outcome = catch_unwind(AssertUnwindSafe(|| consumer.apply_settings(change, snapshot)));

            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!("Consumer {} failed to apply {}: {}", id, change.key, e);
                }
                Err(_) => {
                    report.failed += 1;
                    warn!("Consumer {} panicked while applying {}", id, change.key);
                }
            }
        }

        report
    }

    /// Copy out live consumers for `key`, pruning dead registrations
    fn targets_for(&self, key: &str) -> Vec<(Uuid, Arc<dyn SettingsConsumer>)> {
        let mut has_dead = false;
        let targets = {
            let registrations = self.registrations.read().unwrap_or_else(|e| e.into_inner());
            registrations
                .iter()
                .filter(|r| r.keys.contains(key))
                .filter_map(|r| match r.consumer.upgrade() {
                    Some(consumer) => Some((r.id, consumer)),
                    None => {
                        has_dead = true;
                        None
                    }
                })
                .collect::<Vec<_>>()
        };

        if has_dead {
            let mut registrations = self.registrations.write().unwrap_or_else(|e| e.into_inner());
            registrations.retain(|r| r.consumer.strong_count() > 0);
        }

        targets
    }
}
