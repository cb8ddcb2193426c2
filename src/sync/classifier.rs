//! Pure transaction classification.
//!
//! Direction and self-sent status are functions of the transaction's input
//! and output addresses against the set of addresses the wallet owns. No
//! I/O, no locking; callers may run this anywhere. Cached results on the
//! persisted records are recomputed by the transaction broker whenever the
//! ownership set changes.

use std::collections::HashSet;

use crate::store::records::{TransactionInput, TransactionOutput};

/// Result of classifying one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_incoming: bool,
    pub is_sent_to_self: bool,
}

/// A transaction is incoming iff none of its inputs spend a wallet-owned
/// address. Missing inputs are treated as not-owned.
pub fn is_incoming(inputs: &[TransactionInput], owned: &HashSet<String>) -> bool {
    !inputs
        .iter()
        .flat_map(|input| input.addresses.iter())
        .any(|address| owned.contains(address))
}

/// A transaction is sent-to-self iff every output pays a wallet-owned
/// address and at least one input is wallet-owned. Invitation linkage
/// implies an external counterparty and takes absolute precedence over the
/// address-overlap heuristic.
pub fn is_sent_to_self(
    inputs: &[TransactionInput],
    outputs: &[TransactionOutput],
    owned: &HashSet<String>,
    linked_to_invitation: bool,
) -> bool {
    if linked_to_invitation {
        return false;
    }

    let any_input_owned = inputs
        .iter()
        .flat_map(|input| input.addresses.iter())
        .any(|address| owned.contains(address));
    if !any_input_owned {
        return false;
    }

    outputs
        .iter()
        .flat_map(|output| output.addresses.iter())
        .all(|address| owned.contains(address))
}

pub fn classify(
    inputs: &[TransactionInput],
    outputs: &[TransactionOutput],
    owned: &HashSet<String>,
    linked_to_invitation: bool,
) -> Classification {
    Classification {
        is_incoming: is_incoming(inputs, owned),
        is_sent_to_self: is_sent_to_self(inputs, outputs, owned, linked_to_invitation),
    }
}

/// Confirmation count from the server-reported block height delta. Never
/// computed from local chain state.
pub fn confirmations(relative_to_height: u64, block_height: Option<u64>) -> u32 {
    match block_height {
        Some(height) if height > 0 => relative_to_height
            .saturating_sub(height)
            .saturating_add(1)
            .min(u32::MAX as u64) as u32,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(addresses: &[&str]) -> TransactionInput {
        TransactionInput {
            previous_txid: "aa".repeat(32),
            previous_vout: 0,
            addresses: addresses.iter().map(|s| s.to_string()).collect(),
            value: 50_000,
        }
    }

    fn output(addresses: &[&str]) -> TransactionOutput {
        TransactionOutput {
            index: 0,
            addresses: addresses.iter().map(|s| s.to_string()).collect(),
            value: 40_000,
        }
    }

    fn owned(addresses: &[&str]) -> HashSet<String> {
        addresses.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn external_inputs_to_owned_outputs_is_incoming() {
        let owned = owned(&["ours1", "ours2"]);
        let c = classify(
            &[input(&["theirs"])],
            &[output(&["ours1"])],
            &owned,
            false,
        );
        assert!(c.is_incoming);
        assert!(!c.is_sent_to_self);
    }

    #[test]
    fn owned_inputs_are_never_incoming() {
        let owned = owned(&["ours1"]);
        let c = classify(
            &[input(&["ours1"]), input(&["theirs"])],
            &[output(&["theirs"])],
            &owned,
            false,
        );
        assert!(!c.is_incoming);
    }

    #[test]
    fn all_owned_round_trip_is_sent_to_self() {
        let owned = owned(&["ours1", "ours2"]);
        let c = classify(
            &[input(&["ours1"])],
            &[output(&["ours2"]), output(&["ours1"])],
            &owned,
            false,
        );
        assert!(!c.is_incoming);
        assert!(c.is_sent_to_self);
    }

    #[test]
    fn invitation_linkage_overrides_address_overlap() {
        let owned = owned(&["ours1", "ours2"]);
        let c = classify(&[input(&["ours1"])], &[output(&["ours2"])], &owned, true);
        assert!(!c.is_sent_to_self);
    }

    #[test]
    fn partially_external_outputs_are_not_sent_to_self() {
        let owned = owned(&["ours1"]);
        let c = classify(
            &[input(&["ours1"])],
            &[output(&["theirs"]), output(&["ours1"])],
            &owned,
            false,
        );
        assert!(!c.is_sent_to_self);
    }

    #[test]
    fn missing_inputs_and_outputs_do_not_panic() {
        let owned = owned(&["ours1"]);
        let c = classify(&[], &[], &owned, false);
        // No inputs means no input is owned: incoming by definition, and
        // never sent-to-self.
        assert!(c.is_incoming);
        assert!(!c.is_sent_to_self);
    }

    #[test]
    fn confirmation_count_is_a_height_delta() {
        assert_eq!(confirmations(100, Some(100)), 1);
        assert_eq!(confirmations(105, Some(100)), 6);
        assert_eq!(confirmations(100, None), 0);
        assert_eq!(confirmations(100, Some(0)), 0);
        // Stale local tip still counts the block itself.
        assert_eq!(confirmations(99, Some(100)), 1);
    }
}
