/// Remote synchronization of account-scoped settings
///
/// Every applied local mutation of a synced key becomes a [`SyncJob`]. Jobs
/// are keyed by setting key, so a newer value supersedes an older one that
/// has not been acknowledged yet. The engine retries transient failures
/// with exponential backoff and reports permanent ones per key without
/// reverting the local value.

pub mod engine;
pub mod http;
pub mod remote;
pub mod retry;

pub use engine::*;
pub use http::HttpRemote;
pub use remote::*;
pub use retry::{retry_operation, should_retry, RetryPolicy};

use crate::types::{AccountId, SettingValue};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Lifecycle of a queued write. A job leaves the queue once it commits or
/// is given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncJobState {
    Pending,
    InFlight,
    Retrying,
}

/// One pending write of a setting to the remote preferences service
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub id: Uuid,
    pub account: AccountId,
    pub key: String,
    pub value: SettingValue,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Instant,
    pub state: SyncJobState,
    /// Bumped whenever a newer value supersedes this job
    pub(crate) generation: u64,
}

impl SyncJob {
    pub fn new(account: AccountId, key: &str, value: SettingValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            key: key.to_string(),
            value,
            attempts: 0,
            last_error: None,
            next_retry_at: Instant::now(),
            state: SyncJobState::Pending,
            generation: 0,
        }
    }

    /// Whether the engine may claim this job at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.state, SyncJobState::Pending | SyncJobState::Retrying) && self.next_retry_at <= now
    }
}

/// Per-key sync state as shown to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySyncStatus {
    /// No job queued and no failure recorded
    Synced,
    Pending,
    InFlight,
    Retrying { attempts: u32, last_error: String },
    /// The last write was given up on; the local value was kept
    Failed { error: String },
}

/// What `on_remote_change` did with an inbound value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteChangeOutcome {
    /// Remote value stored and consumers notified
    Applied,
    /// Store already held the value
    Unchanged,
    /// A local write for the key is pending; the key is re-checked later
    Deferred,
    /// Unknown key, device-local key, or invalid value
    Ignored,
}

/// Counts from one or more processing passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub committed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Results dropped because the job was superseded or cancelled in flight
    pub discarded: usize,
}

impl FlushReport {
    pub fn absorb(&mut self, other: FlushReport) {
        self.committed += other.committed;
        self.retried += other.retried;
        self.failed += other.failed;
        self.discarded += other.discarded;
    }

    pub fn is_empty(&self) -> bool {
        *self == FlushReport::default()
    }
}

/// Running totals kept by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatistics {
    pub queued: u64,
    pub network_attempts: u64,
    pub committed: u64,
    pub retried: u64,
    pub failed: u64,
    pub discarded: u64,
}
