//! Bitcoin wallet synchronization and transaction reconciliation engine.
//!
//! This crate implements the wallet-side sync core for a mobile Bitcoin
//! wallet backend. It serializes all wallet-mutating sync work behind a
//! single-worker coordinator, reconciles server-reported transaction and
//! address data against the local store, classifies transaction direction
//! and self-sent status from address ownership, tracks HD derivation
//! indices and gap bookkeeping, drives the peer-to-peer invitation state
//! machine, and grooms stale unconfirmed sends into a failed display state.
//!
//! Network endpoints, the chain explorer and address derivation are
//! collaborators behind traits; their wire formats and key handling are out
//! of scope here.

pub mod api;
pub mod config;
pub mod explorer;
pub mod keys;
pub mod store;
pub mod sync;

pub use config::{EngineConfig, SyncConfig};
pub use store::context::WalletStore;
pub use sync::coordinator::{SyncCoordinator, SyncTicket};
pub use sync::types::{SyncError, SyncKind, SyncOutcome, SyncPolicy, SyncReport};
