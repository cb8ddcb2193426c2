//! Backing store and transactional context.
//!
//! `WalletStore` keeps the canonical [`StoreState`] in memory and mirrors
//! it to a JSON snapshot on disk. A sync pass (or a short broadcast-time
//! operation) works on a [`StoreContext`], a private copy of the state,
//! and commits it with a single [`StoreContext::save`], which replaces the
//! canonical state and flushes the snapshot atomically. Readers that only
//! display data take [`WalletStore::snapshot`] and tolerate eventual
//! consistency with an in-flight pass.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::records::StoreState;

const SNAPSHOT_FILE: &str = "wallet_store.json";
const SNAPSHOT_META_FILE: &str = "wallet_store.meta.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Handle to the canonical wallet state. Cheap to clone.
#[derive(Clone)]
pub struct WalletStore {
    inner: Arc<RwLock<StoreState>>,
    data_dir: Option<PathBuf>,
}

impl WalletStore {
    /// Memory-only store, used by tests and previews.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreState::default())),
            data_dir: None,
        }
    }

    /// Open (or initialize) a file-backed store under `data_dir`.
    pub async fn open(data_dir: PathBuf) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let state = if snapshot_path.exists() {
            let content = tokio::fs::read_to_string(&snapshot_path).await?;
            let state: StoreState = serde_json::from_str(&content)?;
            info!(
                "Loaded store snapshot from {:?} ({} transactions, {} invitations)",
                snapshot_path,
                state.transactions.len(),
                state.invitations.len()
            );
            state
        } else {
            debug!("No store snapshot at {:?}, starting empty", snapshot_path);
            StoreState::default()
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(state)),
            data_dir: Some(data_dir),
        })
    }

    /// Hand out a background context: a private copy of the current state.
    pub fn background_context(&self) -> StoreContext {
        let state = self.inner.read().expect("store lock poisoned").clone();
        StoreContext {
            state,
            store: self.clone(),
        }
    }

    /// Read-only copy for display queries; eventually consistent with any
    /// in-flight pass.
    pub fn snapshot(&self) -> StoreState {
        self.inner.read().expect("store lock poisoned").clone()
    }

    async fn commit(&self, state: &StoreState) -> Result<(), StoreError> {
        {
            let mut guard = self.inner.write().expect("store lock poisoned");
            *guard = state.clone();
        }

        if let Some(dir) = &self.data_dir {
            let snapshot_path = dir.join(SNAPSHOT_FILE);
            let tmp_path = dir.join(format!("{}.tmp", SNAPSHOT_FILE));

            let content = serde_json::to_string_pretty(state)?;
            tokio::fs::write(&tmp_path, content).await?;
            tokio::fs::rename(&tmp_path, &snapshot_path).await?;

            let metadata = serde_json::json!({
                "saved_at": chrono::Utc::now().to_rfc3339(),
                "last_block_height": state.meta.last_block_height,
                "transactions": state.transactions.len(),
            });
            tokio::fs::write(
                dir.join(SNAPSHOT_META_FILE),
                serde_json::to_string_pretty(&metadata)?,
            )
            .await?;

            debug!("Flushed store snapshot to {:?}", snapshot_path);
        }

        Ok(())
    }
}

/// A mutable, transaction-scoped view of the store. All broker operations
/// take one of these; nothing is visible to other readers until `save`.
pub struct StoreContext {
    state: StoreState,
    store: WalletStore,
}

impl StoreContext {
    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StoreState {
        &mut self.state
    }

    /// Commit this context: replace the canonical state and flush the
    /// on-disk snapshot. The single save boundary for everything written
    /// through this context.
    pub async fn save(&self) -> Result<(), StoreError> {
        self.store.commit(&self.state).await
    }
}
