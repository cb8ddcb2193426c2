//! Wallet persistence broker: wallet creation/reset and address
//! registration. Index counters and the gap set are mutated by the address
//! ledger during a pass; this broker only owns the record's existence.

use chrono::Utc;
use tracing::{info, warn};

use crate::keys::{DerivationPath, DerivationScheme};
use crate::store::context::StoreContext;
use crate::store::records::{AddressRecord, AddressSource, StoreState, WalletRecord};

pub struct WalletBroker;

impl WalletBroker {
    /// Create the wallet on first launch. A second call is a no-op; there
    /// is exactly one wallet per install.
    pub fn create_wallet(ctx: &mut StoreContext, scheme: DerivationScheme, has_recovery_words: bool) {
        let state = ctx.state_mut();
        if state.wallet.is_some() {
            warn!("Wallet already exists, ignoring create");
            return;
        }

        state.wallet = Some(WalletRecord::new(scheme, has_recovery_words, Utc::now()));
        info!("Created wallet");
    }

    /// Full wallet reset: drops every persisted aggregate. The only path
    /// that deletes a wallet.
    pub fn reset_wallet(ctx: &mut StoreContext) {
        *ctx.state_mut() = StoreState::default();
        info!("Wallet reset: cleared all persisted state");
    }

    /// Register a locally derived address. Replaces a server-pool record
    /// for the same address (local derivation is the stronger claim) but
    /// never duplicates.
    pub fn register_derived_address(ctx: &mut StoreContext, address: String, path: DerivationPath) {
        ctx.state_mut().addresses.insert(
            address.clone(),
            AddressRecord {
                address,
                path: Some(path),
                source: AddressSource::Derived,
            },
        );
    }
}
