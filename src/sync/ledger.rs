//! Address ledger: derivation-index counters and gap bookkeeping.
//!
//! The ledger is the only writer of the wallet's `last_receive_index` /
//! `last_change_index` counters and the receive-chain gap set. Index
//! computation scans locally derived addresses with on-chain usage;
//! server-pool addresses are handed out by the server before the wallet
//! confirms them locally and must never perturb the counters, otherwise
//! the wallet could skip or reuse a locally significant derivation slot.
//!
//! Within a pass, `update_last_indexes` always runs after transaction
//! persistence so the computation reflects just-persisted data.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::keys::{AddressDeriver, Chain, DerivationPath, KeyError};
use crate::store::context::StoreContext;
use crate::store::records::{AddressSource, StoreState};
use crate::store::wallet_broker::WalletBroker;
use crate::sync::types::{PreconditionFailure, SyncError};

pub struct AddressLedger {
    deriver: Arc<dyn AddressDeriver>,
    lookahead: u32,
}

impl AddressLedger {
    pub fn new(deriver: Arc<dyn AddressDeriver>, lookahead: u32) -> Self {
        Self { deriver, lookahead }
    }

    /// Highest receive-chain index with confirmed on-chain usage among
    /// locally derived addresses, or `None` when no usage exists.
    pub fn max_used_receive_index(state: &StoreState) -> Option<u32> {
        state.used_indices(Chain::Receive).last().copied()
    }

    /// Change-chain counterpart of [`Self::max_used_receive_index`].
    pub fn max_used_change_index(state: &StoreState) -> Option<u32> {
        state.used_indices(Chain::Change).last().copied()
    }

    /// Recompute and persist both counters. The persisted values are
    /// monotonically non-decreasing: a shrunken view of the transaction
    /// graph never moves address generation backwards.
    pub fn update_last_indexes(&self, ctx: &mut StoreContext) {
        let receive = Self::max_used_receive_index(ctx.state());
        let change = Self::max_used_change_index(ctx.state());

        let Some(wallet) = ctx.state_mut().wallet.as_mut() else {
            return;
        };

        wallet.last_receive_index = wallet.last_receive_index.max(receive);
        wallet.last_change_index = wallet.last_change_index.max(change);
        debug!(
            "Updated last indexes: receive {:?}, change {:?}",
            wallet.last_receive_index, wallet.last_change_index
        );
    }

    /// Enforce the gap invariant after an index update: indices that
    /// confirmed as used leave the set, as does anything at or below the
    /// last confirmed-used index. Gap indices are never respend
    /// candidates, so removal is the only mutation here.
    pub fn prune_gaps(&self, ctx: &mut StoreContext) {
        let used = ctx.state().used_indices(Chain::Receive);
        let max_used = ctx
            .state()
            .wallet
            .as_ref()
            .and_then(|w| w.last_receive_index);

        let Some(wallet) = ctx.state_mut().wallet.as_mut() else {
            return;
        };

        let before = wallet.receive_index_gaps.len();
        wallet
            .receive_index_gaps
            .retain(|index| !used.contains(index) && max_used.is_none_or(|max| *index > max));

        let removed = before - wallet.receive_index_gaps.len();
        if removed > 0 {
            info!("Pruned {} gap indices", removed);
        }
    }

    /// Current gap set.
    pub fn gaps(state: &StoreState) -> BTreeSet<u32> {
        state
            .wallet
            .as_ref()
            .map(|w| w.receive_index_gaps.clone())
            .unwrap_or_default()
    }

    /// Allocate the next receive address to show a user: first index past
    /// the confirmed maximum that is not already allocated to a gap. The
    /// index joins the gap set until it confirms as used.
    pub fn next_receive_address(&self, ctx: &mut StoreContext) -> Result<(String, u32), SyncError> {
        let state = ctx.state();
        let wallet = state
            .wallet
            .as_ref()
            .ok_or(PreconditionFailure::MissingWallet)?;
        let scheme = wallet.scheme;

        let mut candidate = wallet.last_receive_index.map_or(0, |max| max + 1);
        while wallet.receive_index_gaps.contains(&candidate) {
            candidate += 1;
        }

        let path = DerivationPath::new(scheme, Chain::Receive, candidate);
        let address = self.deriver.derive_address(&path)?;

        WalletBroker::register_derived_address(ctx, address.clone(), path);
        if let Some(wallet) = ctx.state_mut().wallet.as_mut() {
            wallet.receive_index_gaps.insert(candidate);
        }

        info!("Allocated receive address at index {}", candidate);
        Ok((address, candidate))
    }

    /// Keep a window of derived addresses ahead of the last used index on
    /// both chains so the next sync queries them. Returns how many
    /// addresses were generated.
    pub fn ensure_lookahead(&self, ctx: &mut StoreContext) -> Result<u32, KeyError> {
        let Some(wallet) = ctx.state().wallet.as_ref() else {
            return Ok(0);
        };
        let scheme = wallet.scheme;
        let targets = [
            (Chain::Receive, wallet.last_receive_index),
            (Chain::Change, wallet.last_change_index),
        ];

        let mut generated = 0;
        for (chain, last_used) in targets {
            let existing: BTreeSet<u32> = ctx
                .state()
                .addresses
                .values()
                .filter(|a| a.source == AddressSource::Derived)
                .filter_map(|a| a.path)
                .filter(|p| p.chain == chain)
                .map(|p| p.index)
                .collect();

            let upper = last_used.map_or(0, |max| max + 1) + self.lookahead;
            for index in 0..upper {
                if existing.contains(&index) {
                    continue;
                }
                let path = DerivationPath::new(scheme, chain, index);
                let address = self.deriver.derive_address(&path)?;
                WalletBroker::register_derived_address(ctx, address, path);
                generated += 1;
            }
        }

        if generated > 0 {
            debug!("Generated {} lookahead addresses", generated);
        }
        Ok(generated)
    }
}
