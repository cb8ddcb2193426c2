use std::path::PathBuf;

use chrono::Duration;

/// Tuning knobs for a sync pass.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of addresses per transaction-summary query.
    pub address_batch_size: usize,
    /// How long a completed pass stays "fresh" for `SyncPolicy::IfStale`.
    pub staleness_window: std::time::Duration,
    /// Validity window for a pending invitation before it expires.
    pub invitation_validity: Duration,
    /// Age before an unconfirmed plain send is eligible for failure grooming.
    pub grooming_threshold: Duration,
    /// Age before an unconfirmed invitation-linked send is eligible.
    pub grooming_invitation_threshold: Duration,
    /// How many derived addresses to keep ahead of the last used index.
    pub address_lookahead: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            address_batch_size: 25,
            staleness_window: std::time::Duration::from_secs(5 * 60),
            invitation_validity: Duration::hours(48),
            grooming_threshold: Duration::minutes(5),
            grooming_invitation_threshold: Duration::minutes(3),
            address_lookahead: 20,
        }
    }
}

/// Top-level engine configuration for the binary entry point.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the wallet API.
    pub api_url: String,
    /// Base URL of the chain explorer used by failure grooming.
    pub explorer_url: String,
    /// Directory holding the persisted store snapshot.
    pub data_dir: PathBuf,
    /// Account-level output descriptor for address derivation.
    pub descriptor: String,
    /// Bitcoin network for derived addresses.
    pub network: bitcoin::Network,
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let network = match std::env::var("WALLET_NETWORK").as_deref() {
            Ok("mainnet") | Ok("bitcoin") => bitcoin::Network::Bitcoin,
            Ok("signet") => bitcoin::Network::Signet,
            Ok("regtest") => bitcoin::Network::Regtest,
            _ => bitcoin::Network::Testnet,
        };

        Self {
            api_url: std::env::var("WALLET_API_URL")
                .unwrap_or_else(|_| "https://api.coin.example/api/v1".to_string()),
            explorer_url: std::env::var("WALLET_EXPLORER_URL")
                .unwrap_or_else(|_| "https://blockstream.info/testnet/api".to_string()),
            data_dir: std::env::var("WALLET_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./wallet-data")),
            descriptor: std::env::var("WALLET_DESCRIPTOR").unwrap_or_default(),
            network,
            sync: SyncConfig::default(),
        }
    }
}
