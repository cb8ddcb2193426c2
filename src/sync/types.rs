use chrono::{DateTime, Utc};

use crate::api::ApiError;
use crate::explorer::ExplorerError;
use crate::keys::KeyError;
use crate::store::StoreError;
use crate::sync::invitations::InvitationError;

/// What a pass treats as canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Incremental: server responses only add or update, never delete.
    Standard,
    /// The response set is canonical; local txids absent from it are removed.
    Full,
}

/// How a request behaves against the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Queue unconditionally, FIFO behind any in-flight pass.
    Always,
    /// Skip (resolving immediately) when the last pass is recent enough.
    IfStale,
    /// Fail fast with a busy signal instead of queueing behind an
    /// in-flight or queued pass.
    SkipIfInProgress,
}

/// Terminal result of one admitted sync request.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// `IfStale` request within the staleness window; nothing ran.
    SkippedFresh,
}

/// Statistics for one completed pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub kind: SyncKind,
    pub block_height: u64,
    pub transactions_upserted: usize,
    pub transactions_removed: usize,
    pub temporary_promoted: usize,
    pub invitations_updated: usize,
    pub invitations_expired: usize,
    pub groomed_failed: usize,
    /// Per-item integrity failures logged and skipped, not fatal.
    pub items_skipped: usize,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "{:?} sync at height {}: {} upserted, {} removed, {} promoted, {} invitations updated ({} expired), {} groomed failed{}",
            self.kind,
            self.block_height,
            self.transactions_upserted,
            self.transactions_removed,
            self.temporary_promoted,
            self.invitations_updated,
            self.invitations_expired,
            self.groomed_failed,
            if self.items_skipped == 0 {
                String::new()
            } else {
                format!(", {} items skipped", self.items_skipped)
            }
        )
    }
}

/// Checked before any I/O; never retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionFailure {
    #[error("no wallet exists")]
    MissingWallet,

    #[error("recovery words are missing")]
    MissingRecoveryWords,

    #[error("user/device is not registered")]
    NotRegistered,

    #[error("a sync is already in progress")]
    SyncInProgress,
}

/// A server response that contradicts local state. The offending item is
/// rejected; the rest of the batch may still succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IntegrityError {
    #[error("address {address} matches no known derived address")]
    UnknownAddress { address: String },

    #[error("temporary transaction {txid} was already persisted")]
    DuplicateTemporaryTransaction { txid: String },
}

/// Error types for the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionFailure),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("invitation error: {0}")]
    Invitation(#[from] InvitationError),

    #[error("explorer error: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("sync worker is gone")]
    WorkerGone,
}
