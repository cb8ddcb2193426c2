//! Persisted entity records.
//!
//! Everything the engine reconciles lives in one [`StoreState`] value:
//! wallet metadata and index counters, registered addresses, the
//! transaction graph, invitations and user verification state. Records are
//! plain serde data; derived fields (`is_incoming`, `is_sent_to_self`) are
//! caches that the transaction broker recomputes after every
//! ownership-affecting write.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::{Chain, DerivationPath, DerivationScheme};

/// One wallet per install. Owns the index counters and the gap set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub scheme: DerivationScheme,
    pub created_at: DateTime<Utc>,
    /// Whether recovery material exists locally. A sync is refused without it.
    pub has_recovery_words: bool,
    /// Highest receive-chain index with confirmed on-chain usage.
    pub last_receive_index: Option<u32>,
    /// Highest change-chain index with confirmed on-chain usage.
    pub last_change_index: Option<u32>,
    /// Receive-chain indices allocated (address shown) but not yet used.
    pub receive_index_gaps: BTreeSet<u32>,
}

impl WalletRecord {
    pub fn new(scheme: DerivationScheme, has_recovery_words: bool, now: DateTime<Utc>) -> Self {
        Self {
            scheme,
            created_at: now,
            has_recovery_words,
            last_receive_index: None,
            last_change_index: None,
            receive_index_gaps: BTreeSet::new(),
        }
    }
}

/// Where an address came from. Server-pool addresses are pre-generated and
/// handed out by the server for incoming invitations; they never count
/// toward max-used-index computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressSource {
    Derived,
    ServerPool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: String,
    /// Known for locally derived addresses; a server-pool address arrives
    /// without one.
    pub path: Option<DerivationPath>,
    pub source: AddressSource,
}

/// Previous-output reference consumed by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub previous_txid: String,
    pub previous_vout: u32,
    pub addresses: Vec<String>,
    pub value: u64,
}

/// Output created by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub index: u32,
    pub addresses: Vec<String>,
    pub value: u64,
}

/// Local-broadcast bookkeeping, present only between broadcast and the
/// first server confirmation of matching vin/vout data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporarySend {
    pub recipient_address: Option<String>,
    pub amount: u64,
    pub fee: u64,
    pub broadcast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: String,
    pub confirmations: u32,
    pub block_hash: Option<String>,
    pub broadcast_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    /// Cached classification; recomputed whenever address ownership changes.
    pub is_incoming: bool,
    pub is_sent_to_self: bool,
    pub temporary: Option<TemporarySend>,
    pub invitation_id: Option<String>,
    /// Grooming display flag. A failed send is kept, never deleted.
    pub failed: bool,
}

impl TransactionRecord {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationSide {
    Sent,
    Received,
}

/// Invitation lifecycle states. `Completed`, `Canceled` and `Expired` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationStatus {
    NotSent,
    RequestSent,
    AddressSent,
    Completed,
    Canceled,
    Expired,
}

impl InvitationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvitationStatus::Completed | InvitationStatus::Canceled | InvitationStatus::Expired
        )
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InvitationStatus::NotSent => "notSent",
            InvitationStatus::RequestSent => "requestSent",
            InvitationStatus::AddressSent => "addressSent",
            InvitationStatus::Completed => "completed",
            InvitationStatus::Canceled => "canceled",
            InvitationStatus::Expired => "expired",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Counterparty {
    PhoneHash(String),
    Twitter(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationRecord {
    /// Server-issued id.
    pub id: String,
    pub side: InvitationSide,
    pub status: InvitationStatus,
    pub counterparty: Option<Counterparty>,
    pub sats: u64,
    pub fee_sats: u64,
    /// Receiving address supplied by the counterparty.
    pub address: Option<String>,
    /// Linked transaction, set exactly once at acknowledgment.
    pub txid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Grooming display flag, orthogonal to the state machine.
    pub failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Server-issued user id; cleared on de-verification.
    pub id: Option<String>,
    pub device_id: Option<String>,
    pub verification: VerificationStatus,
    #[serde(default)]
    pub verified_identities: Vec<String>,
}

impl UserRecord {
    pub fn is_registered(&self) -> bool {
        self.id.is_some() && self.device_id.is_some()
    }
}

/// Pass-level bookkeeping updated at the end of every committed sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreMeta {
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_block_height: u64,
}

/// The full persisted state of one wallet install.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    pub wallet: Option<WalletRecord>,
    pub user: Option<UserRecord>,
    pub addresses: HashMap<String, AddressRecord>,
    pub transactions: HashMap<String, TransactionRecord>,
    pub invitations: HashMap<String, InvitationRecord>,
    pub meta: StoreMeta,
}

impl StoreState {
    /// Addresses the wallet owns for classification purposes: locally
    /// derived receive and change addresses with confirmed derivation
    /// paths. Server-pool addresses are excluded until locally confirmed.
    pub fn owned_addresses(&self) -> HashSet<String> {
        self.addresses
            .values()
            .filter(|a| a.source == AddressSource::Derived)
            .map(|a| a.address.clone())
            .collect()
    }

    /// Every address registered locally, including server-pool ones; the
    /// full query surface for a sync fetch.
    pub fn all_addresses(&self) -> Vec<String> {
        self.addresses.keys().cloned().collect()
    }

    /// Addresses with observed on-chain usage in the persisted graph.
    pub fn used_addresses(&self) -> HashSet<&str> {
        let mut used = HashSet::new();
        for tx in self.transactions.values() {
            for input in &tx.inputs {
                used.extend(input.addresses.iter().map(String::as_str));
            }
            for output in &tx.outputs {
                used.extend(output.addresses.iter().map(String::as_str));
            }
        }
        used
    }

    /// Derivation indices on the given chain whose derived address has
    /// on-chain usage. Server-pool relations never participate.
    pub fn used_indices(&self, chain: Chain) -> BTreeSet<u32> {
        let used = self.used_addresses();
        self.addresses
            .values()
            .filter(|a| a.source == AddressSource::Derived)
            .filter_map(|a| a.path.map(|p| (a, p)))
            .filter(|(a, p)| p.chain == chain && used.contains(a.address.as_str()))
            .map(|(_, p)| p.index)
            .collect()
    }
}
