/// Write-behind channel from the synchronous store to the async cache.
///
/// Commands are applied in the order they were sent, by a single task.
use crate::{
    store::{CacheOwner, JournalEntry, PreferenceCache},
    types::{AccountId, SettingValue},
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug)]
pub enum CacheCommand {
    Save {
        owner: CacheOwner,
        key: String,
        value: SettingValue,
    },
    SaveJob(JournalEntry),
    RemoveJob {
        account: AccountId,
        key: String,
    },
    /// Replies once every earlier command has been applied
    Barrier(oneshot::Sender<()>),
}

/// Cloneable, non-blocking sender half
#[derive(Debug, Clone)]
pub struct CacheWriter {
    tx: mpsc::UnboundedSender<CacheCommand>,
}

impl CacheWriter {
    /// Spawn the writer task for `cache`
    pub fn spawn(cache: Arc<dyn PreferenceCache>) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(cache, rx));
        (Self { tx }, handle)
    }

    fn send(&self, command: CacheCommand) {
        if self.tx.send(command).is_err() {
            warn!("Cache writer has stopped, dropping cache command");
        }
    }

    pub fn save(&self, owner: CacheOwner, key: &str, value: SettingValue) {
        self.send(CacheCommand::Save {
            owner,
            key: key.to_string(),
            value,
        });
    }

    pub fn save_job(&self, entry: JournalEntry) {
        self.send(CacheCommand::SaveJob(entry));
    }

    pub fn remove_job(&self, account: AccountId, key: &str) {
        self.send(CacheCommand::RemoveJob {
            account,
            key: key.to_string(),
        });
    }

    /// Wait until every command sent before this call has been applied
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(CacheCommand::Barrier(tx));
        let _ = rx.await;
    }
}

async fn run_writer(cache: Arc<dyn PreferenceCache>, mut rx: mpsc::UnboundedReceiver<CacheCommand>) {
    while let Some(command) = rx.recv().await {
        let result = match command {
            CacheCommand::Save { owner, key, value } => cache.save(&owner, &key, &value).await,
            CacheCommand::SaveJob(entry) => cache.save_job(&entry).await,
            CacheCommand::RemoveJob { account, key } => cache.remove_job(&account, &key).await,
            CacheCommand::Barrier(reply) => {
                let _ = reply.send(());
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Cache write failed: {}", e);
        }
    }
    debug!("Cache writer stopped");
}
