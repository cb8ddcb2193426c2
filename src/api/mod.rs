pub mod client;
pub mod types;

pub use client::{CoinApiClient, WalletApi};
pub use types::*;
