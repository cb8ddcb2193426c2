//! Invitation lifecycle state machine.
//!
//! `notSent → requestSent → addressSent → completed`, with `canceled` and
//! `expired` reachable from non-terminal states. Transition legality lives
//! here; persistence of the results lives in the invitation broker. The
//! terminal states are absorbing: a completed, canceled or expired
//! invitation never moves again, and grooming may only flip its display
//! flag, never its status.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::store::records::{InvitationRecord, InvitationStatus};

#[derive(Debug, Clone, thiserror::Error)]
pub enum InvitationError {
    #[error("invitation {id} is unknown")]
    Unknown { id: String },

    #[error("invitation {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: InvitationStatus,
        to: InvitationStatus,
    },

    #[error("invitation {id}: cancel rejected after address was supplied")]
    CancelAfterAddress { id: String },

    #[error("invitation {id}: acknowledged with {existing}, refusing conflicting {incoming}")]
    AcknowledgmentConflict {
        id: String,
        existing: String,
        incoming: String,
    },

    #[error("invitation {id}: acknowledgment carries no txid")]
    MissingAcknowledgmentTxid { id: String },

    #[error("invitation {id}: no receiving address available for fulfillment")]
    MissingAddress { id: String },
}

/// Validate a single edge of the state machine.
pub fn check_transition(
    record: &InvitationRecord,
    to: InvitationStatus,
) -> Result<(), InvitationError> {
    use InvitationStatus::*;

    let legal = match (record.status, to) {
        (NotSent, RequestSent) => true,
        (RequestSent, AddressSent) => true,
        (AddressSent, Completed) => true,
        (NotSent | RequestSent | AddressSent, Expired) => true,
        (RequestSent, Canceled) => true,
        _ => false,
    };

    if legal {
        Ok(())
    } else if to == InvitationStatus::Canceled && record.status == InvitationStatus::AddressSent {
        Err(InvitationError::CancelAfterAddress {
            id: record.id.clone(),
        })
    } else {
        Err(InvitationError::InvalidTransition {
            id: record.id.clone(),
            from: record.status,
            to,
        })
    }
}

/// The local side submitted the address request; amount and fee are
/// reserved by the caller before this point.
pub fn mark_request_sent(record: &mut InvitationRecord) -> Result<(), InvitationError> {
    check_transition(record, InvitationStatus::RequestSent)?;
    record.status = InvitationStatus::RequestSent;
    Ok(())
}

/// The counterparty supplied a receiving address; on the sender side this
/// unblocks building and broadcasting the transaction.
pub fn fulfill_address(
    record: &mut InvitationRecord,
    address: String,
) -> Result<(), InvitationError> {
    check_transition(record, InvitationStatus::AddressSent)?;
    record.status = InvitationStatus::AddressSent;
    record.address = Some(address);
    debug!("Invitation {} moved to addressSent", record.id);
    Ok(())
}

/// User-initiated cancellation; only legal before the counterparty has
/// supplied an address.
pub fn cancel(record: &mut InvitationRecord) -> Result<(), InvitationError> {
    check_transition(record, InvitationStatus::Canceled)?;
    record.status = InvitationStatus::Canceled;
    info!("Invitation {} canceled", record.id);
    Ok(())
}

/// Move one invitation to expired.
pub fn expire(record: &mut InvitationRecord) -> Result<(), InvitationError> {
    check_transition(record, InvitationStatus::Expired)?;
    record.status = InvitationStatus::Expired;
    Ok(())
}

/// Time-based expiry sweep: any `requestSent`/`addressSent` invitation
/// older than the validity window with no further counterparty action
/// expires. Returns the ids that transitioned.
pub fn expire_stale(
    invitations: &mut std::collections::HashMap<String, InvitationRecord>,
    now: DateTime<Utc>,
    validity: Duration,
) -> Vec<String> {
    let mut expired = Vec::new();

    for record in invitations.values_mut() {
        if matches!(
            record.status,
            InvitationStatus::RequestSent | InvitationStatus::AddressSent
        ) && now - record.created_at > validity
        {
            // Non-terminal and stale; the transition cannot fail here.
            if expire(record).is_ok() {
                info!("Invitation {} expired after validity window", record.id);
                expired.push(record.id.clone());
            }
        }
    }

    expired
}
