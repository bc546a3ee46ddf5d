use crate::{
    error::{Error, Result},
    schema::Scope,
    store::{CacheWriter, JournalEntry, LocalStore},
    sync::{
        retry::{should_retry, with_attempt_timeout, RetryPolicy},
        FlushReport, KeySyncStatus, RemoteChangeOutcome, RemotePreferencesService, SyncJob,
        SyncJobState, SyncStatistics,
    },
    types::{AccountId, SettingValue, SyncEvent, SyncEventHandler},
};
use futures_util::future::join_all;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::{Duration, SystemTime},
};
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{sleep, sleep_until, Instant},
};
use tracing::{debug, info, warn};

/// How long `flush_pending` waits between polls while another task holds
/// every remaining job in flight
const IN_FLIGHT_POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct SyncQueue {
    jobs: HashMap<String, SyncJob>,
    next_generation: u64,
    failures: HashMap<String, String>,
    /// Remote values that arrived while a local write was pending
    deferred: HashMap<String, SettingValue>,
    /// Keys to compare against the remote once their write resolved
    recheck: BTreeSet<String>,
}

impl SyncQueue {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// True when `key` now needs a re-check
    fn resolve_deferred(&mut self, key: &str) -> bool {
        self.deferred.remove(key).is_some() && self.recheck.insert(key.to_string())
    }
}

/// What a worker took out of the queue for one network attempt
struct Claim {
    account: AccountId,
    key: String,
    value: SettingValue,
    attempts: u32,
    generation: u64,
}

enum NextDue {
    Idle,
    At(Instant),
    AllInFlight,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    network_attempts: AtomicU64,
    committed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// Pushes queued setting changes to the remote service
pub struct RemoteSyncEngine {
    remote: Arc<dyn RemotePreferencesService>,
    policy: RetryPolicy,
    queue: Mutex<SyncQueue>,
    wake: Notify,
    handlers: RwLock<Vec<SyncEventHandler>>,
    journal: Option<CacheWriter>,
    counters: Counters,
}

impl RemoteSyncEngine {
    pub fn new(remote: Arc<dyn RemotePreferencesService>, policy: RetryPolicy) -> Self {
        Self {
            remote,
            policy,
            queue: Mutex::new(SyncQueue::default()),
            wake: Notify::new(),
            handlers: RwLock::new(Vec::new()),
            journal: None,
            counters: Counters::default(),
        }
    }

    /// Record queued jobs in the durable cache so they survive a restart
    pub fn with_journal(mut self, journal: CacheWriter) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn remote(&self) -> &Arc<dyn RemotePreferencesService> {
        &self.remote
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, SyncQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an event handler.
    ///
    /// Handlers run on whichever thread produced the event, possibly while
    /// the store is applying a mutation, so they must not call back into
    /// the store.
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push(Box::new(handler));
    }

    fn emit(&self, event: &SyncEvent) {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            handler(event);
        }
    }

    /// Queue a write. A job already queued for the same key takes the new
    /// value instead; if that job is in flight, its result will be ignored
    /// and the new value sent afterwards.
    pub fn enqueue(&self, job: SyncJob) {
        let entry = JournalEntry {
            account: job.account.clone(),
            key: job.key.clone(),
            value: job.value.clone(),
        };

        {
            let mut queue = self.lock_queue();
            let generation = queue.next_generation();
            queue.failures.remove(&job.key);

            match queue.jobs.get_mut(&job.key) {
                Some(existing) if existing.state == SyncJobState::InFlight => {
                    debug!("Superseding in-flight write of {}", job.key);
                    existing.account = job.account;
                    existing.value = job.value;
                    existing.generation = generation;
                }
                Some(existing) => {
                    debug!("Collapsing queued write of {}", job.key);
                    existing.account = job.account;
                    existing.value = job.value;
                    existing.generation = generation;
                    existing.state = SyncJobState::Pending;
                    existing.attempts = 0;
                    existing.last_error = None;
                    existing.next_retry_at = Instant::now();
                }
                None => {
                    let mut job = job;
                    job.generation = generation;
                    job.state = SyncJobState::Pending;
                    job.next_retry_at = Instant::now();
                    debug!("Queued write {} for {}", job.id, job.key);
                    queue.jobs.insert(job.key.clone(), job);
                }
            }
        }

        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if let Some(journal) = &self.journal {
            journal.save_job(entry.clone());
        }
        self.wake.notify_one();
        self.emit(&SyncEvent::Queued {
            account: entry.account,
            key: entry.key,
        });
    }

    /// Run one pass: send every due job concurrently and record the results.
    ///
    /// Each send runs in its own task and records its own result, so a job
    /// is never left in flight when the caller stops waiting for the pass.
    pub async fn process_due(self: &Arc<Self>) -> FlushReport {
        let now = Instant::now();
        let claims: Vec<Claim> = {
            let mut queue = self.lock_queue();
            queue
                .jobs
                .values_mut()
                .filter(|job| job.is_due(now))
                .map(|job| {
                    job.state = SyncJobState::InFlight;
                    job.attempts += 1;
                    Claim {
                        account: job.account.clone(),
                        key: job.key.clone(),
                        value: job.value.clone(),
                        attempts: job.attempts,
                        generation: job.generation,
                    }
                })
                .collect()
        };

        let mut report = FlushReport::default();
        if claims.is_empty() {
            return report;
        }

        let sends: Vec<_> = claims
            .into_iter()
            .map(|claim| {
                let key = claim.key.clone();
                let generation = claim.generation;
                let engine = Arc::clone(self);
                let task = tokio::spawn(async move {
                    let result = engine.send(&claim).await;
                    let mut report = FlushReport::default();
                    engine.complete(claim, result, &mut report);
                    report
                });
                async move { (key, generation, task.await) }
            })
            .collect();

        for (key, generation, outcome) in join_all(sends).await {
            match outcome {
                Ok(sent) => report.absorb(sent),
                Err(e) => {
                    warn!("Send task for {} did not finish: {}", key, e);
                    self.release(&key, generation);
                }
            }
        }

        report
    }

    /// Put a claim whose task died back in the queue
    fn release(&self, key: &str, generation: u64) {
        let mut queue = self.lock_queue();
        if let Some(job) = queue.jobs.get_mut(key) {
            if job.state == SyncJobState::InFlight {
                if job.generation != generation {
                    job.attempts = 0;
                    job.last_error = None;
                }
                job.state = SyncJobState::Pending;
                job.next_retry_at = Instant::now();
                self.wake.notify_one();
            }
        }
    }

    async fn send(&self, claim: &Claim) -> Result<()> {
        self.counters.network_attempts.fetch_add(1, Ordering::Relaxed);
        debug!("Sending {} (attempt {})", claim.key, claim.attempts);
        with_attempt_timeout(
            self.policy.attempt_timeout,
            self.remote.update_preference(&claim.account, &claim.key, &claim.value),
        )
        .await
    }

    fn complete(&self, claim: Claim, result: Result<()>, report: &mut FlushReport) {
        let mut journal_removal = None;

        let event = {
            let mut queue = self.lock_queue();
            let Some(job) = queue.jobs.get_mut(&claim.key) else {
                debug!("Dropping result for cancelled write of {}", claim.key);
                report.discarded += 1;
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                return;
            };

            if job.generation != claim.generation {
                debug!("Write of {} was superseded in flight, resending", claim.key);
                job.state = SyncJobState::Pending;
                job.attempts = 0;
                job.last_error = None;
                job.next_retry_at = Instant::now();
                report.discarded += 1;
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                self.wake.notify_one();
                return;
            }

            match result {
                Ok(()) => {
                    queue.jobs.remove(&claim.key);
                    if queue.resolve_deferred(&claim.key) {
                        self.wake.notify_one();
                    }
                    journal_removal = Some((claim.account.clone(), claim.key.clone()));
                    report.committed += 1;
                    self.counters.committed.fetch_add(1, Ordering::Relaxed);
                    info!("Committed {} after {} attempt(s)", claim.key, claim.attempts);
                    SyncEvent::Committed {
                        account: claim.account,
                        key: claim.key,
                        attempts: claim.attempts,
                    }
                }
                Err(error) if should_retry(&error) && claim.attempts < self.policy.max_attempts => {
                    let delay = self.policy.calculate_delay(claim.attempts);
                    job.state = SyncJobState::Retrying;
                    job.last_error = Some(error.to_string());
                    job.next_retry_at = Instant::now() + delay;
                    report.retried += 1;
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Write of {} failed (attempt {}), retrying in {:?}: {}",
                        claim.key, claim.attempts, delay, error
                    );
                    SyncEvent::Retrying {
                        account: claim.account,
                        key: claim.key,
                        attempts: claim.attempts,
                        error: error.to_string(),
                        next_retry_at: SystemTime::now() + delay,
                    }
                }
                Err(error) => {
                    queue.jobs.remove(&claim.key);
                    queue.failures.insert(claim.key.clone(), error.to_string());
                    // The local value is kept, so a late remote value must not
                    // overwrite it either.
                    queue.deferred.remove(&claim.key);
                    journal_removal = Some((claim.account.clone(), claim.key.clone()));
                    report.failed += 1;
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Giving up on write of {} after {} attempt(s): {}",
                        claim.key, claim.attempts, error
                    );
                    SyncEvent::Failed {
                        account: claim.account,
                        key: claim.key,
                        attempts: claim.attempts,
                        error: error.to_string(),
                    }
                }
            }
        };

        if let (Some(journal), Some((account, key))) = (&self.journal, journal_removal) {
            journal.remove_job(account, &key);
        }
        self.emit(&event);
    }

    fn next_due(&self) -> NextDue {
        let queue = self.lock_queue();
        if queue.jobs.is_empty() {
            return NextDue::Idle;
        }
        queue
            .jobs
            .values()
            .filter(|job| job.state != SyncJobState::InFlight)
            .map(|job| job.next_retry_at)
            .min()
            .map_or(NextDue::AllInFlight, NextDue::At)
    }

    /// Drive passes until no job remains, sleeping through backoff delays
    pub async fn flush_pending(self: &Arc<Self>) -> FlushReport {
        let mut report = FlushReport::default();
        loop {
            report.absorb(self.process_due().await);
            match self.next_due() {
                NextDue::Idle => break,
                NextDue::At(deadline) => sleep_until(deadline).await,
                NextDue::AllInFlight => sleep(IN_FLIGHT_POLL).await,
            }
        }

        debug!(
            "Flush finished: {} committed, {} failed, {} retried, {} discarded",
            report.committed, report.failed, report.retried, report.discarded
        );
        report
    }

    /// Process jobs in the background, waking on enqueue or the next retry
    /// deadline, and at least every `idle_interval`. Keys whose remote value
    /// was deferred are re-checked against the service for `store` once
    /// their write commits.
    pub fn spawn_worker(self: &Arc<Self>, store: &Arc<LocalStore>, idle_interval: Duration) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let store = Arc::downgrade(store);
        tokio::spawn(async move {
            debug!("Sync worker started");
            loop {
                let (Some(engine), Some(store)) = (engine.upgrade(), store.upgrade()) else {
                    break;
                };

                engine.process_due().await;

                let idle_deadline = Instant::now() + idle_interval;
                let mut deadline = match engine.next_due() {
                    NextDue::At(at) => at.min(idle_deadline),
                    NextDue::AllInFlight => (Instant::now() + IN_FLIGHT_POLL).min(idle_deadline),
                    NextDue::Idle => idle_deadline,
                };

                if let Err(e) = engine.recheck(&store).await {
                    let delay = engine.policy.calculate_delay(1);
                    warn!("Re-check of deferred keys failed, trying again in {:?}: {}", delay, e);
                    deadline = deadline.min(Instant::now() + delay);
                }
                drop(store);

                tokio::select! {
                    _ = engine.wake.notified() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            debug!("Sync worker stopped");
        })
    }

    /// Apply an inbound remote value under the conflict policy.
    ///
    /// With no local write pending for `key`, the remote value wins and is
    /// applied through `store` without queueing a write back. With one
    /// pending, the local value takes precedence and the key is re-checked
    /// once the write commits.
    pub fn on_remote_change(&self, store: &LocalStore, key: &str, value: SettingValue) -> Result<RemoteChangeOutcome> {
        match store.schema().scope_of(key) {
            Some(Scope::Synced) => {}
            Some(Scope::LocalOnly) => {
                debug!("Ignoring remote value for device-local {}", key);
                return Ok(RemoteChangeOutcome::Ignored);
            }
            None => {
                debug!("Ignoring remote value for unknown key {}", key);
                return Ok(RemoteChangeOutcome::Ignored);
            }
        }

        let mut deferred = false;
        let deferred_value = value.clone();
        let applied = store.apply_remote_unless(key, value, || {
            let mut queue = self.lock_queue();
            if queue.jobs.contains_key(key) {
                queue.deferred.insert(key.to_string(), deferred_value);
                deferred = true;
                return true;
            }
            queue.failures.remove(key);
            false
        });

        match applied {
            Ok(_) if deferred => {
                debug!("Local write of {} pending, deferring remote value", key);
                Ok(RemoteChangeOutcome::Deferred)
            }
            Ok(true) => Ok(RemoteChangeOutcome::Applied),
            Ok(false) => Ok(RemoteChangeOutcome::Unchanged),
            Err(Error::Validation(reason)) => {
                warn!("Ignoring invalid remote value: {}", reason);
                Ok(RemoteChangeOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    /// Keys whose deferred remote value should now be compared against the
    /// service
    pub fn recheck_keys(&self) -> Vec<String> {
        self.lock_queue().recheck.iter().cloned().collect()
    }

    /// Pull the remote values of keys whose write committed while a remote
    /// change was deferred, and apply them under the conflict policy.
    ///
    /// When the pull fails the keys stay parked for the next attempt.
    pub async fn recheck(&self, store: &LocalStore) -> Result<usize> {
        let keys: Vec<String> = {
            let mut queue = self.lock_queue();
            if queue.recheck.is_empty() {
                return Ok(0);
            }
            std::mem::take(&mut queue.recheck).into_iter().collect()
        };

        let Some(account) = store.account() else {
            debug!("No account to re-check {} deferred key(s) against", keys.len());
            return Ok(0);
        };

        let pulled = with_attempt_timeout(self.policy.attempt_timeout, self.remote.get_preferences(&account)).await;
        let remote = match pulled {
            Ok(remote) => remote,
            Err(e) => {
                // A session change in the meantime cleared the set; the keys
                // belong to the old account then.
                if store.account().as_ref() == Some(&account) {
                    self.lock_queue().recheck.extend(keys);
                }
                return Err(e);
            }
        };

        let mut applied = 0;
        for key in keys {
            let Some(value) = remote.get(&key) else {
                continue;
            };
            let outcome = self.on_remote_change(store, &key, value.clone())?;
            debug!("Re-checked {} against remote: {:?}", key, outcome);
            if outcome == RemoteChangeOutcome::Applied {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Drop every queued job and deferred value. In-flight results that
    /// arrive afterwards are discarded. The durable journal is kept so the
    /// writes resume when the account's session starts again.
    pub fn cancel_all(&self) -> usize {
        let mut queue = self.lock_queue();
        let dropped = queue.jobs.len();
        queue.jobs.clear();
        queue.deferred.clear();
        queue.recheck.clear();
        queue.failures.clear();
        if dropped > 0 {
            info!("Cancelled {} pending write(s)", dropped);
        }
        dropped
    }

    pub fn status(&self, key: &str) -> KeySyncStatus {
        let queue = self.lock_queue();
        if let Some(job) = queue.jobs.get(key) {
            return match job.state {
                SyncJobState::InFlight => KeySyncStatus::InFlight,
                SyncJobState::Retrying => KeySyncStatus::Retrying {
                    attempts: job.attempts,
                    last_error: job.last_error.clone().unwrap_or_default(),
                },
                _ => KeySyncStatus::Pending,
            };
        }
        match queue.failures.get(key) {
            Some(error) => KeySyncStatus::Failed { error: error.clone() },
            None => KeySyncStatus::Synced,
        }
    }

    /// Keys whose last write was given up on, with the error
    pub fn failed_keys(&self) -> Vec<(String, String)> {
        let queue = self.lock_queue();
        let mut failed: Vec<_> = queue
            .failures
            .iter()
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();
        failed.sort();
        failed
    }

    /// Forget the failure flag for `key`
    pub fn clear_failure(&self, key: &str) -> bool {
        self.lock_queue().failures.remove(key).is_some()
    }

    /// Value currently queued for `key`, if any
    pub fn pending_value(&self, key: &str) -> Option<SettingValue> {
        self.lock_queue().jobs.get(key).map(|job| job.value.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.lock_queue().jobs.len()
    }

    pub fn statistics(&self) -> SyncStatistics {
        SyncStatistics {
            queued: self.counters.queued.load(Ordering::Relaxed),
            network_attempts: self.counters.network_attempts.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}
