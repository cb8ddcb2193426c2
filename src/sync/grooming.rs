//! Failure grooming: the last stage of a sync pass.
//!
//! A locally broadcast transaction that has aged past its threshold with
//! zero confirmations and is absent from the latest canonical server set
//! is a failure *candidate*; the chain explorer must also confirm
//! non-existence before anything is flagged, because a transaction can be
//! genuinely slow to confirm without being failed. Grooming flags, never
//! deletes, and its outcomes are pass data, not errors.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::explorer::ChainExplorer;
use crate::store::context::StoreContext;
use crate::store::records::InvitationStatus;

#[derive(Debug, Clone, Copy, Default)]
pub struct GroomingSummary {
    /// Candidates checked against the explorer.
    pub checked: usize,
    /// Transactions flagged as failed.
    pub failed: usize,
}

pub struct FailureDetector {
    explorer: Arc<dyn ChainExplorer>,
    plain_threshold: Duration,
    invitation_threshold: Duration,
}

impl FailureDetector {
    pub fn new(explorer: Arc<dyn ChainExplorer>, config: &SyncConfig) -> Self {
        Self {
            explorer,
            plain_threshold: config.grooming_threshold,
            invitation_threshold: config.grooming_invitation_threshold,
        }
    }

    /// Sweep locally broadcast transactions and flag the ones the chain
    /// does not know about. `canonical` is the txid set reported by the
    /// server in this pass.
    pub async fn sweep(
        &self,
        ctx: &mut StoreContext,
        canonical: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> GroomingSummary {
        let mut summary = GroomingSummary::default();

        let candidates: Vec<String> = ctx
            .state()
            .transactions
            .values()
            .filter(|tx| tx.temporary.is_some() && tx.confirmations == 0 && !tx.failed)
            .filter(|tx| !canonical.contains(&tx.txid))
            .filter(|tx| {
                // A completed invitation's terminal state takes precedence:
                // its transaction is never eligible for failure grooming.
                tx.invitation_id
                    .as_ref()
                    .and_then(|id| ctx.state().invitations.get(id))
                    .is_none_or(|inv| inv.status != InvitationStatus::Completed)
            })
            .filter(|tx| {
                let threshold = self.threshold_for(tx.invitation_id.is_some());
                tx.temporary
                    .as_ref()
                    .map(|t| now - t.broadcast_at > threshold)
                    .unwrap_or(false)
            })
            .map(|tx| tx.txid.clone())
            .collect();

        for txid in candidates {
            summary.checked += 1;

            match self.explorer.transaction_exists(&txid).await {
                Ok(true) => {
                    debug!("{} still known to the chain, leaving pending", txid);
                }
                Ok(false) => {
                    warn!("{} confirmed absent from the chain, flagging failed", txid);
                    Self::flag_failed(ctx, &txid);
                    summary.failed += 1;
                }
                Err(e) => {
                    // Cannot confirm non-existence; a single missing
                    // observation is not sufficient evidence.
                    warn!("Explorer check for {} failed, skipping: {}", txid, e);
                }
            }
        }

        summary
    }

    fn threshold_for(&self, invitation_linked: bool) -> Duration {
        if invitation_linked {
            self.invitation_threshold
        } else {
            self.plain_threshold
        }
    }

    fn flag_failed(ctx: &mut StoreContext, txid: &str) {
        let state = ctx.state_mut();
        let Some(tx) = state.transactions.get_mut(txid) else {
            return;
        };
        tx.failed = true;

        if let Some(invitation_id) = tx.invitation_id.clone() {
            if let Some(invitation) = state.invitations.get_mut(&invitation_id) {
                if invitation.status != InvitationStatus::Completed {
                    invitation.failed = true;
                }
            }
        }
    }
}
