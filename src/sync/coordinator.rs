//! The serializing sync coordinator.
//!
//! Every trigger that wants a sync (foreground launch, background fetch,
//! push notification, manual refresh) goes through [`SyncCoordinator`].
//! Requests are admitted into a FIFO queue drained by exactly one worker
//! task, so at most one pipeline pass executes at a time and no two
//! passes' writes can interleave. `SkipIfInProgress` requests are refused
//! with a busy signal instead of queued, which keeps simultaneous triggers
//! from growing the queue without bound.
//!
//! Every admitted request resolves its [`SyncTicket`] exactly once, and
//! precondition violations (missing wallet, missing recovery words,
//! unregistered user, busy) fail fast before any I/O.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::api::client::WalletApi;
use crate::config::SyncConfig;
use crate::explorer::ChainExplorer;
use crate::keys::AddressDeriver;
use crate::store::context::WalletStore;
use crate::sync::pipeline::SyncPipeline;
use crate::sync::types::{PreconditionFailure, SyncError, SyncKind, SyncOutcome, SyncPolicy};

struct QueuedSync {
    kind: SyncKind,
    reply: oneshot::Sender<Result<SyncOutcome, SyncError>>,
}

/// Completion handle for one admitted sync request.
pub struct SyncTicket {
    receiver: oneshot::Receiver<Result<SyncOutcome, SyncError>>,
}

impl SyncTicket {
    /// Wait for the terminal result of this request.
    pub async fn wait(self) -> Result<SyncOutcome, SyncError> {
        self.receiver.await.unwrap_or(Err(SyncError::WorkerGone))
    }
}

pub struct SyncCoordinator {
    sender: mpsc::UnboundedSender<QueuedSync>,
    /// In-flight plus queued requests; the busy signal reads this.
    pending: Arc<AtomicUsize>,
    store: WalletStore,
    last_completed: Arc<Mutex<Option<Instant>>>,
    staleness_window: std::time::Duration,
}

impl SyncCoordinator {
    /// Wire the pipeline and spawn the single worker task.
    pub fn new(
        store: WalletStore,
        api: Arc<dyn WalletApi>,
        explorer: Arc<dyn ChainExplorer>,
        deriver: Arc<dyn AddressDeriver>,
        config: SyncConfig,
    ) -> Self {
        let staleness_window = config.staleness_window;
        let pipeline = SyncPipeline::new(store.clone(), api, explorer, deriver, config);

        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let last_completed = Arc::new(Mutex::new(None));

        tokio::spawn(Self::run_worker(
            receiver,
            pipeline,
            pending.clone(),
            last_completed.clone(),
        ));

        Self {
            sender,
            pending,
            store,
            last_completed,
            staleness_window,
        }
    }

    /// Admit a sync request. Preconditions are checked synchronously and
    /// violations are reported to the caller immediately; an admitted
    /// request is queued FIFO behind any in-flight pass and its ticket
    /// resolves exactly once.
    pub fn request_sync(
        &self,
        kind: SyncKind,
        policy: SyncPolicy,
    ) -> Result<SyncTicket, SyncError> {
        if policy == SyncPolicy::SkipIfInProgress && self.pending.load(Ordering::SeqCst) > 0 {
            debug!("Sync already in progress, refusing {:?} request", kind);
            return Err(PreconditionFailure::SyncInProgress.into());
        }

        let state = self.store.snapshot();
        let wallet = state
            .wallet
            .as_ref()
            .ok_or(PreconditionFailure::MissingWallet)?;
        if !wallet.has_recovery_words {
            return Err(PreconditionFailure::MissingRecoveryWords.into());
        }
        if !state.user.as_ref().is_some_and(|u| u.is_registered()) {
            return Err(PreconditionFailure::NotRegistered.into());
        }

        let (reply, receiver) = oneshot::channel();

        if policy == SyncPolicy::IfStale {
            let fresh = self
                .last_completed
                .lock()
                .expect("coordinator lock poisoned")
                .is_some_and(|at| at.elapsed() < self.staleness_window);
            if fresh {
                debug!("Last sync is fresh, skipping {:?} request", kind);
                let _ = reply.send(Ok(SyncOutcome::SkippedFresh));
                return Ok(SyncTicket { receiver });
            }
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(QueuedSync { kind, reply }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncError::WorkerGone);
        }

        debug!(
            "Enqueued {:?} sync ({} pending)",
            kind,
            self.pending.load(Ordering::SeqCst)
        );
        Ok(SyncTicket { receiver })
    }

    /// In-flight plus queued request count.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Drain the queue one pass at a time. The only place pipeline passes
    /// run, so admission order is execution order and a pass always runs
    /// to completion before the next is taken.
    async fn run_worker(
        mut receiver: mpsc::UnboundedReceiver<QueuedSync>,
        pipeline: SyncPipeline,
        pending: Arc<AtomicUsize>,
        last_completed: Arc<Mutex<Option<Instant>>>,
    ) {
        info!("Sync worker started");

        while let Some(job) = receiver.recv().await {
            let result = pipeline.run(job.kind).await;

            if result.is_ok() {
                *last_completed.lock().expect("coordinator lock poisoned") = Some(Instant::now());
            }
            pending.fetch_sub(1, Ordering::SeqCst);

            if job.reply.send(result.map(SyncOutcome::Completed)).is_err() {
                debug!("Sync requester went away before completion");
            }
        }

        info!("Sync worker stopped");
    }
}
