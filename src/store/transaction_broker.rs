//! Transaction persistence broker.
//!
//! Idempotent upserts of server-reported transactions keyed by txid, the
//! broadcast-time temporary record, full-sync reconciliation against a
//! canonical listing, and the explicit classification recompute that runs
//! after every ownership-affecting write. All operations mutate a
//! caller-supplied [`StoreContext`]; the broker never saves.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::types::TransactionResponse;
use crate::store::context::StoreContext;
use crate::store::records::{
    StoreState, TemporarySend, TransactionInput, TransactionOutput, TransactionRecord,
};
use crate::sync::classifier;
use crate::sync::types::IntegrityError;

/// Counters for one persistence batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionPersistSummary {
    pub upserted: usize,
    pub removed: usize,
    pub promoted: usize,
}

pub struct TransactionBroker;

impl TransactionBroker {
    /// Upsert a batch of server-reported transactions. With `full_sync`
    /// the response set is canonical and any locally-held txid absent from
    /// it is deleted; without it, absence means nothing and the batch only
    /// adds or updates.
    pub fn persist_transactions(
        ctx: &mut StoreContext,
        responses: &[TransactionResponse],
        relative_to_height: u64,
        full_sync: bool,
    ) -> TransactionPersistSummary {
        let mut summary = TransactionPersistSummary::default();
        let state = ctx.state_mut();

        for response in responses {
            let inputs = convert_inputs(response);
            let outputs = convert_outputs(response);
            let confirmations = classifier::confirmations(relative_to_height, response.height);

            match state.transactions.get_mut(&response.txid) {
                Some(existing) => {
                    existing.confirmations = confirmations;
                    existing.block_hash = response.block_hash.clone();
                    existing.inputs = inputs;
                    existing.outputs = outputs;
                    if existing.temporary.take().is_some() {
                        debug!(
                            "Promoted temporary transaction {} to server-confirmed",
                            response.txid
                        );
                        summary.promoted += 1;
                    }
                }
                None => {
                    state.transactions.insert(
                        response.txid.clone(),
                        TransactionRecord {
                            txid: response.txid.clone(),
                            confirmations,
                            block_hash: response.block_hash.clone(),
                            broadcast_at: None,
                            received_at: response.received_time.unwrap_or_else(Utc::now),
                            inputs,
                            outputs,
                            is_incoming: false,
                            is_sent_to_self: false,
                            temporary: None,
                            invitation_id: None,
                            failed: false,
                        },
                    );
                }
            }
            summary.upserted += 1;
        }

        if full_sync {
            let canonical: HashSet<&str> = responses.iter().map(|r| r.txid.as_str()).collect();
            let stale: Vec<String> = state
                .transactions
                .keys()
                .filter(|txid| !canonical.contains(txid.as_str()))
                .cloned()
                .collect();

            for txid in stale {
                warn!("Full sync: removing {} (absent from canonical set)", txid);
                state.transactions.remove(&txid);
                summary.removed += 1;
            }
        }

        Self::reconcile_classification(ctx);

        info!(
            "Persisted {} transactions ({} promoted, {} removed)",
            summary.upserted, summary.promoted, summary.removed
        );
        summary
    }

    /// Record a locally broadcast send before the server knows about it.
    /// Called once per broadcast; a second call for the same txid is a
    /// broadcast-flow bug and is rejected.
    pub fn persist_temporary_transaction(
        ctx: &mut StoreContext,
        txid: &str,
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        temporary: TemporarySend,
        invitation_id: Option<String>,
    ) -> Result<(), IntegrityError> {
        let state = ctx.state_mut();
        if state.transactions.contains_key(txid) {
            return Err(IntegrityError::DuplicateTemporaryTransaction {
                txid: txid.to_string(),
            });
        }

        let broadcast_at = temporary.broadcast_at;
        state.transactions.insert(
            txid.to_string(),
            TransactionRecord {
                txid: txid.to_string(),
                confirmations: 0,
                block_hash: None,
                broadcast_at: Some(broadcast_at),
                received_at: broadcast_at,
                inputs,
                outputs,
                is_incoming: false,
                is_sent_to_self: false,
                temporary: Some(temporary),
                invitation_id,
                failed: false,
            },
        );

        info!("Persisted temporary transaction {}", txid);
        Self::reconcile_classification(ctx);
        Ok(())
    }

    /// Recompute the cached `is_incoming`/`is_sent_to_self` for every
    /// persisted transaction from the current ownership set. Runs after
    /// any write that can change address ownership; the cached values are
    /// never trusted across such a write.
    pub fn reconcile_classification(ctx: &mut StoreContext) {
        let state = ctx.state_mut();
        Self::link_invitation_transactions(state);

        let owned = state.owned_addresses();
        for record in state.transactions.values_mut() {
            let classification = classifier::classify(
                &record.inputs,
                &record.outputs,
                &owned,
                record.invitation_id.is_some(),
            );
            record.is_incoming = classification.is_incoming;
            record.is_sent_to_self = classification.is_sent_to_self;
        }
    }

    /// Attach invitation back-references to transactions the invitations
    /// already point at.
    fn link_invitation_transactions(state: &mut StoreState) {
        for invitation in state.invitations.values() {
            if let Some(txid) = &invitation.txid {
                if let Some(record) = state.transactions.get_mut(txid) {
                    if record.invitation_id.is_none() {
                        record.invitation_id = Some(invitation.id.clone());
                    }
                }
            }
        }
    }
}

fn convert_inputs(response: &TransactionResponse) -> Vec<TransactionInput> {
    response
        .vin
        .iter()
        .map(|vin| TransactionInput {
            previous_txid: vin.txid.clone(),
            previous_vout: vin.vout,
            addresses: vin.addresses.clone(),
            value: vin.value,
        })
        .collect()
}

fn convert_outputs(response: &TransactionResponse) -> Vec<TransactionOutput> {
    response
        .vout
        .iter()
        .map(|vout| TransactionOutput {
            index: vout.n,
            addresses: vout.addresses.clone(),
            value: vout.value,
        })
        .collect()
}
