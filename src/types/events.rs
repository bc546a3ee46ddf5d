use crate::types::{AccountId, SettingValue};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Sync event handler function type
pub type SyncEventHandler = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Where a store mutation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOrigin {
    /// Explicit `set` by a local caller
    Local,
    /// Part of a `reset_to_defaults` batch
    Reset,
    /// Inbound value from the remote preferences service
    Remote,
    /// Loaded from the durable cache at session start or account switch
    Hydrate,
}

/// A single applied mutation, delivered to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingChange {
    pub key: String,
    pub old_value: SettingValue,
    pub new_value: SettingValue,
    pub origin: ChangeOrigin,
    /// Snapshot revision produced by this change
    pub revision: u64,
}

/// Events emitted by the remote sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A write was queued (or an existing job for the key was superseded)
    Queued { account: AccountId, key: String },
    /// Remote acknowledged the write
    Committed {
        account: AccountId,
        key: String,
        attempts: u32,
    },
    /// Transient failure, retry scheduled
    Retrying {
        account: AccountId,
        key: String,
        attempts: u32,
        error: String,
        next_retry_at: SystemTime,
    },
    /// Retries exhausted or permanent error; local value kept
    Failed {
        account: AccountId,
        key: String,
        attempts: u32,
        error: String,
    },
}

impl SyncEvent {
    pub fn key(&self) -> &str {
        match self {
            SyncEvent::Queued { key, .. }
            | SyncEvent::Committed { key, .. }
            | SyncEvent::Retrying { key, .. }
            | SyncEvent::Failed { key, .. } => key,
        }
    }
}
