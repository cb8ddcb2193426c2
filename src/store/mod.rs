//! Backing store and the per-entity persistence brokers.
//!
//! The store owns one canonical [`records::StoreState`] snapshot. All
//! mutation happens through a [`context::StoreContext`] handed out by
//! [`context::WalletStore`]; brokers operate on a context and never open
//! their own save boundary, so a sync pass commits exactly once.

pub mod context;
pub mod invitation_broker;
pub mod records;
pub mod transaction_broker;
pub mod user_broker;
pub mod wallet_broker;

pub use context::{StoreContext, StoreError, WalletStore};
pub use invitation_broker::InvitationBroker;
pub use transaction_broker::TransactionBroker;
pub use user_broker::UserBroker;
pub use wallet_broker::WalletBroker;
