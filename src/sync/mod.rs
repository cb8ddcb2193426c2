//! Wallet Synchronization Module
//!
//! Core logic for reconciling local wallet state with the server. Each
//! submodule owns one aspect of a pass:
//!
//! - `coordinator`: single-worker FIFO admission of sync requests; the one
//!   place passes execute.
//! - `pipeline`: the fetch → classify → persist → detect-failures pass.
//! - `classifier`: pure direction/self-sent/confirmation computation.
//! - `ledger`: derivation-index counters and gap bookkeeping.
//! - `invitations`: the invitation lifecycle state machine.
//! - `grooming`: failure detection for stale unconfirmed broadcasts.
//! - `types`: request/outcome types and the engine error taxonomy.

/// Pure transaction classification
pub mod classifier;
/// Serializing admission queue for sync requests
pub mod coordinator;
/// Failure grooming sweep
pub mod grooming;
/// Invitation lifecycle state machine
pub mod invitations;
/// Derivation-index and gap ledger
pub mod ledger;
/// The reconciliation pass itself
pub mod pipeline;
/// Shared types and errors
pub mod types;

pub use coordinator::*;
