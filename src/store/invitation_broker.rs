//! Invitation persistence broker.
//!
//! Applies server-reported invitation state to the local records through
//! the lifecycle state machine, registers counterparty-supplied addresses,
//! and performs the acknowledgment that atomically completes a sent
//! invitation and creates or attaches its transaction. Acknowledgment is
//! idempotent by acknowledgment txid: replaying the same acknowledgment is
//! a no-op, a conflicting one is rejected.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::api::types::{InvitationResponse, InvitationSideDto, InvitationStatusDto};
use crate::store::context::StoreContext;
use crate::store::records::{
    AddressRecord, AddressSource, Counterparty, InvitationRecord, InvitationSide,
    InvitationStatus, TemporarySend, TransactionRecord,
};
use crate::store::transaction_broker::TransactionBroker;
use crate::sync::invitations::{self, InvitationError};

/// Broadcast-side data the sender holds at acknowledgment time.
#[derive(Debug, Clone)]
pub struct OutgoingInvitationData {
    pub txid: String,
    pub recipient_address: String,
    pub amount: u64,
    pub fee: u64,
    pub broadcast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcknowledgeOutcome {
    Acknowledged,
    /// Same acknowledgment replayed; nothing changed.
    AlreadyAcknowledged,
}

pub struct InvitationBroker;

impl InvitationBroker {
    /// Insert a locally created outgoing invitation in `notSent`. The
    /// request flow moves it to `requestSent` once the server accepts it.
    pub fn register_outgoing(
        ctx: &mut StoreContext,
        id: &str,
        counterparty: Counterparty,
        sats: u64,
        fee_sats: u64,
        now: DateTime<Utc>,
    ) {
        ctx.state_mut().invitations.insert(
            id.to_string(),
            InvitationRecord {
                id: id.to_string(),
                side: InvitationSide::Sent,
                status: InvitationStatus::NotSent,
                counterparty: Some(counterparty),
                sats,
                fee_sats,
                address: None,
                txid: None,
                created_at: now,
                completed_at: None,
                failed: false,
            },
        );
    }

    /// Merge one server-reported invitation into local state. Returns true
    /// when the local record changed. Terminal local states win over any
    /// later server report, except that a completed server report replays
    /// through the idempotent acknowledgment path.
    pub fn apply_response(
        ctx: &mut StoreContext,
        response: &InvitationResponse,
    ) -> Result<bool, InvitationError> {
        if !ctx.state().invitations.contains_key(&response.id) {
            let record = Self::record_from_response(response);
            info!(
                "Discovered {} invitation {} in {}",
                match record.side {
                    InvitationSide::Sent => "sent",
                    InvitationSide::Received => "received",
                },
                record.id,
                record.status
            );
            ctx.state_mut()
                .invitations
                .insert(response.id.clone(), record);
            Self::register_counterparty_address(ctx, response);
            TransactionBroker::reconcile_classification(ctx);
            return Ok(true);
        }

        let local_status = ctx.state().invitations[&response.id].status;
        if local_status.is_terminal() {
            if response.status == InvitationStatusDto::Completed
                && local_status == InvitationStatus::Completed
            {
                // Replayed completion; acknowledge path decides no-op vs conflict.
                return Self::acknowledge_invitation(ctx, None, response)
                    .map(|outcome| outcome == AcknowledgeOutcome::Acknowledged);
            }
            debug!(
                "Ignoring server update for terminal invitation {} ({})",
                response.id, local_status
            );
            return Ok(false);
        }

        match response.status {
            InvitationStatusDto::Canceled => {
                // Server-side cancellation (counterparty or operator) is
                // authoritative for any non-terminal record.
                let record = ctx
                    .state_mut()
                    .invitations
                    .get_mut(&response.id)
                    .expect("checked above");
                record.status = InvitationStatus::Canceled;
                info!("Invitation {} canceled by server", response.id);
                Ok(true)
            }
            InvitationStatusDto::Expired => {
                let record = ctx
                    .state_mut()
                    .invitations
                    .get_mut(&response.id)
                    .expect("checked above");
                record.status = InvitationStatus::Expired;
                info!("Invitation {} expired by server", response.id);
                Ok(true)
            }
            InvitationStatusDto::Completed => {
                Self::acknowledge_invitation(ctx, None, response)
                    .map(|outcome| outcome == AcknowledgeOutcome::Acknowledged)
            }
            InvitationStatusDto::New => {
                let mut changed = false;
                if let Some(address) = &response.address {
                    if local_status == InvitationStatus::RequestSent {
                        let record = ctx
                            .state_mut()
                            .invitations
                            .get_mut(&response.id)
                            .expect("checked above");
                        invitations::fulfill_address(record, address.clone())?;
                        Self::register_counterparty_address(ctx, response);
                        TransactionBroker::reconcile_classification(ctx);
                        changed = true;
                    }
                } else if local_status == InvitationStatus::NotSent {
                    let record = ctx
                        .state_mut()
                        .invitations
                        .get_mut(&response.id)
                        .expect("checked above");
                    invitations::mark_request_sent(record)?;
                    changed = true;
                }
                Ok(changed)
            }
        }
    }

    /// Complete a sent invitation: move it to `completed` and create or
    /// attach exactly one transaction for the acknowledgment txid.
    ///
    /// Idempotency: a second call with the same acknowledgment txid is a
    /// no-op; a different txid against a completed invitation is a
    /// data-integrity error and nothing is persisted for it.
    pub fn acknowledge_invitation(
        ctx: &mut StoreContext,
        outgoing: Option<&OutgoingInvitationData>,
        response: &InvitationResponse,
    ) -> Result<AcknowledgeOutcome, InvitationError> {
        let ack_txid = response
            .txid
            .clone()
            .or_else(|| outgoing.map(|o| o.txid.clone()))
            .ok_or_else(|| InvitationError::MissingAcknowledgmentTxid {
                id: response.id.clone(),
            })?;

        let (local_status, existing_txid) = {
            let record = ctx.state().invitations.get(&response.id).ok_or_else(|| {
                InvitationError::Unknown {
                    id: response.id.clone(),
                }
            })?;
            (record.status, record.txid.clone())
        };

        if local_status == InvitationStatus::Completed {
            return match existing_txid.as_deref() {
                Some(existing) if existing == ack_txid => {
                    debug!(
                        "Invitation {} already acknowledged with {}, no-op",
                        response.id, ack_txid
                    );
                    Ok(AcknowledgeOutcome::AlreadyAcknowledged)
                }
                Some(existing) => Err(InvitationError::AcknowledgmentConflict {
                    id: response.id.clone(),
                    existing: existing.to_string(),
                    incoming: ack_txid,
                }),
                None => {
                    // Completed without a linked txid should not happen;
                    // repair by attaching rather than failing the batch.
                    warn!(
                        "Invitation {} completed without txid, attaching {}",
                        response.id, ack_txid
                    );
                    let record = ctx
                        .state_mut()
                        .invitations
                        .get_mut(&response.id)
                        .expect("checked above");
                    record.txid = Some(ack_txid.clone());
                    Self::ensure_transaction(ctx, &ack_txid, outgoing, &response.id);
                    Ok(AcknowledgeOutcome::Acknowledged)
                }
            };
        }

        // Walk the record up to addressSent if the server skipped ahead of
        // our local view, then complete.
        {
            let fulfillment_address = response
                .address
                .clone()
                .or_else(|| outgoing.map(|o| o.recipient_address.clone()));
            let record = ctx
                .state_mut()
                .invitations
                .get_mut(&response.id)
                .expect("checked above");

            if record.status == InvitationStatus::NotSent {
                invitations::mark_request_sent(record)?;
            }
            if record.status == InvitationStatus::RequestSent {
                let address =
                    fulfillment_address.ok_or_else(|| InvitationError::MissingAddress {
                        id: response.id.clone(),
                    })?;
                invitations::fulfill_address(record, address)?;
            }

            invitations::check_transition(record, InvitationStatus::Completed)?;
            record.status = InvitationStatus::Completed;
            record.txid = Some(ack_txid.clone());
            record.completed_at = Some(response.completed_at.unwrap_or_else(Utc::now));
        }

        Self::ensure_transaction(ctx, &ack_txid, outgoing, &response.id);
        info!(
            "Invitation {} acknowledged with transaction {}",
            response.id, ack_txid
        );
        Ok(AcknowledgeOutcome::Acknowledged)
    }

    /// User-initiated cancellation; legal only before the counterparty has
    /// supplied an address.
    pub fn cancel_invitation(ctx: &mut StoreContext, id: &str) -> Result<(), InvitationError> {
        let record = ctx
            .state_mut()
            .invitations
            .get_mut(id)
            .ok_or_else(|| InvitationError::Unknown { id: id.to_string() })?;
        invitations::cancel(record)
    }

    /// Create the acknowledgment transaction if no record for the txid
    /// exists yet, then re-link and re-classify. Existing records are
    /// attached, never duplicated.
    fn ensure_transaction(
        ctx: &mut StoreContext,
        txid: &str,
        outgoing: Option<&OutgoingInvitationData>,
        invitation_id: &str,
    ) {
        let state = ctx.state_mut();
        if !state.transactions.contains_key(txid) {
            let now = Utc::now();
            let (temporary, broadcast_at) = match outgoing {
                Some(data) => (
                    Some(TemporarySend {
                        recipient_address: Some(data.recipient_address.clone()),
                        amount: data.amount,
                        fee: data.fee,
                        broadcast_at: data.broadcast_at,
                    }),
                    Some(data.broadcast_at),
                ),
                None => (None, None),
            };

            state.transactions.insert(
                txid.to_string(),
                TransactionRecord {
                    txid: txid.to_string(),
                    confirmations: 0,
                    block_hash: None,
                    broadcast_at,
                    received_at: broadcast_at.unwrap_or(now),
                    inputs: Vec::new(),
                    outputs: Vec::new(),
                    is_incoming: false,
                    is_sent_to_self: false,
                    temporary,
                    invitation_id: Some(invitation_id.to_string()),
                    failed: false,
                },
            );
        }

        TransactionBroker::reconcile_classification(ctx);
    }

    /// On the received side the server hands out one of our pool
    /// addresses; register it so sync queries cover it. Never overwrites a
    /// locally derived record for the same address.
    fn register_counterparty_address(ctx: &mut StoreContext, response: &InvitationResponse) {
        if response.side != InvitationSideDto::Received {
            return;
        }
        let Some(address) = &response.address else {
            return;
        };

        ctx.state_mut()
            .addresses
            .entry(address.clone())
            .or_insert_with(|| {
                debug!("Registered server-pool address {}", address);
                AddressRecord {
                    address: address.clone(),
                    path: None,
                    source: AddressSource::ServerPool,
                }
            });
    }

    fn record_from_response(response: &InvitationResponse) -> InvitationRecord {
        let side = match response.side {
            InvitationSideDto::Sent => InvitationSide::Sent,
            InvitationSideDto::Received => InvitationSide::Received,
        };

        let status = match response.status {
            InvitationStatusDto::Completed => InvitationStatus::Completed,
            InvitationStatusDto::Canceled => InvitationStatus::Canceled,
            InvitationStatusDto::Expired => InvitationStatus::Expired,
            InvitationStatusDto::New if response.address.is_some() => InvitationStatus::AddressSent,
            InvitationStatusDto::New => InvitationStatus::RequestSent,
        };

        let counterparty = response
            .phone_number_hash
            .clone()
            .map(Counterparty::PhoneHash)
            .or_else(|| response.twitter_handle.clone().map(Counterparty::Twitter));

        InvitationRecord {
            id: response.id.clone(),
            side,
            status,
            counterparty,
            sats: response.sats,
            fee_sats: response.fee_sats,
            address: response.address.clone(),
            txid: response.txid.clone(),
            created_at: response.created_at,
            completed_at: response.completed_at,
            failed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::context::WalletStore;

    fn completed_response(id: &str, txid: &str) -> InvitationResponse {
        InvitationResponse {
            id: id.to_string(),
            status: InvitationStatusDto::Completed,
            side: InvitationSideDto::Sent,
            sats: 25_000,
            fee_sats: 800,
            address: Some("their-addr".to_string()),
            txid: Some(txid.to_string()),
            phone_number_hash: Some("ph-hash".to_string()),
            twitter_handle: None,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    fn pending_context() -> StoreContext {
        let store = WalletStore::in_memory();
        let mut ctx = store.background_context();
        InvitationBroker::register_outgoing(
            &mut ctx,
            "inv-1",
            Counterparty::PhoneHash("ph-hash".to_string()),
            25_000,
            800,
            Utc::now(),
        );
        invitations::mark_request_sent(ctx.state_mut().invitations.get_mut("inv-1").unwrap())
            .unwrap();
        ctx
    }

    #[test]
    fn acknowledgment_is_idempotent() {
        let mut ctx = pending_context();
        let response = completed_response("inv-1", "tx-ack");

        let first = InvitationBroker::acknowledge_invitation(&mut ctx, None, &response)
            .expect("first acknowledgment must succeed");
        assert_eq!(first, AcknowledgeOutcome::Acknowledged);

        let second = InvitationBroker::acknowledge_invitation(&mut ctx, None, &response)
            .expect("replayed acknowledgment must be a no-op");
        assert_eq!(second, AcknowledgeOutcome::AlreadyAcknowledged);

        // Exactly one transaction, invitation completed either way.
        assert_eq!(ctx.state().transactions.len(), 1);
        let invitation = &ctx.state().invitations["inv-1"];
        assert_eq!(invitation.status, InvitationStatus::Completed);
        assert_eq!(invitation.txid.as_deref(), Some("tx-ack"));
        assert_eq!(
            ctx.state().transactions["tx-ack"].invitation_id.as_deref(),
            Some("inv-1")
        );
    }

    #[test]
    fn conflicting_acknowledgment_is_rejected() {
        let mut ctx = pending_context();
        InvitationBroker::acknowledge_invitation(&mut ctx, None, &completed_response("inv-1", "tx-a"))
            .unwrap();

        let err = InvitationBroker::acknowledge_invitation(
            &mut ctx,
            None,
            &completed_response("inv-1", "tx-b"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            InvitationError::AcknowledgmentConflict { .. }
        ));
        assert_eq!(ctx.state().transactions.len(), 1);
    }

    #[test]
    fn unknown_invitation_acknowledgment_is_an_integrity_error() {
        let store = WalletStore::in_memory();
        let mut ctx = store.background_context();

        let err = InvitationBroker::acknowledge_invitation(
            &mut ctx,
            None,
            &completed_response("inv-missing", "tx-a"),
        )
        .unwrap_err();
        assert!(matches!(err, InvitationError::Unknown { .. }));
        assert!(ctx.state().transactions.is_empty());
    }

    #[test]
    fn received_side_address_registers_as_server_pool() {
        let store = WalletStore::in_memory();
        let mut ctx = store.background_context();

        let response = InvitationResponse {
            id: "inv-r".to_string(),
            status: InvitationStatusDto::New,
            side: InvitationSideDto::Received,
            sats: 10_000,
            fee_sats: 300,
            address: Some("pool-addr".to_string()),
            txid: None,
            phone_number_hash: None,
            twitter_handle: Some("someone".to_string()),
            created_at: Utc::now(),
            completed_at: None,
        };

        InvitationBroker::apply_response(&mut ctx, &response).unwrap();

        let record = &ctx.state().addresses["pool-addr"];
        assert_eq!(record.source, AddressSource::ServerPool);
        assert!(record.path.is_none());
        assert_eq!(
            ctx.state().invitations["inv-r"].status,
            InvitationStatus::AddressSent
        );
    }

    #[test]
    fn sender_fulfillment_unblocks_on_counterparty_address() {
        let mut ctx = pending_context();

        let mut response = completed_response("inv-1", "tx-a");
        response.status = InvitationStatusDto::New;
        response.txid = None;

        InvitationBroker::apply_response(&mut ctx, &response).unwrap();
        let invitation = &ctx.state().invitations["inv-1"];
        assert_eq!(invitation.status, InvitationStatus::AddressSent);
        assert_eq!(invitation.address.as_deref(), Some("their-addr"));
    }
}
