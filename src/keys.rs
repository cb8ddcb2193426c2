//! Derivation path types and the address-derivation seam.
//!
//! Key material and signing live in the wallet-crypto library; this module
//! only knows how to turn an account-level public descriptor into addresses
//! at `(chain, index)` positions. Everything that consumes addresses goes
//! through the [`AddressDeriver`] trait so the engine can be exercised with
//! a deterministic fake.

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, Network, PublicKey};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which side of the account the path descends into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    Receive,
    Change,
}

impl Chain {
    pub fn child_index(self) -> u32 {
        match self {
            Chain::Receive => 0,
            Chain::Change => 1,
        }
    }
}

/// The `purpose'/coin_type'/account'` prefix shared by every path in a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationScheme {
    pub purpose: u32,
    pub coin_type: u32,
    pub account: u32,
}

impl DerivationScheme {
    /// Native segwit mainnet scheme.
    pub fn bip84() -> Self {
        Self {
            purpose: 84,
            coin_type: 0,
            account: 0,
        }
    }

    /// Native segwit testnet scheme.
    pub fn bip84_testnet() -> Self {
        Self {
            purpose: 84,
            coin_type: 1,
            account: 0,
        }
    }
}

/// A fully qualified derivation position. Unique per wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationPath {
    pub scheme: DerivationScheme,
    pub chain: Chain,
    pub index: u32,
}

impl DerivationPath {
    pub fn new(scheme: DerivationScheme, chain: Chain, index: u32) -> Self {
        Self {
            scheme,
            chain,
            index,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("derivation failed: {0}")]
    Derivation(String),
}

/// Address derivation seam over the wallet-crypto library.
pub trait AddressDeriver: Send + Sync {
    fn derive_address(&self, path: &DerivationPath) -> Result<String, KeyError>;
}

/// Derives P2WPKH addresses from the xpub embedded in an account descriptor.
pub struct DescriptorDeriver {
    xpub: Xpub,
    network: Network,
}

impl DescriptorDeriver {
    pub fn from_descriptor(descriptor: &str, network: Network) -> Result<Self, KeyError> {
        let xpub = Self::extract_xpub(descriptor)?;
        Ok(Self { xpub, network })
    }

    /// Pull the xpub/tpub out of a descriptor string such as
    /// `wpkh([fp/84'/0'/0']xpub.../0/*)`.
    fn extract_xpub(descriptor: &str) -> Result<Xpub, KeyError> {
        let start = descriptor
            .find("tpub")
            .or_else(|| descriptor.find("xpub"))
            .ok_or_else(|| KeyError::InvalidDescriptor("no xpub/tpub found".into()))?;

        let end = descriptor[start..]
            .find(['/', ')'])
            .map(|i| start + i)
            .unwrap_or(descriptor.len());

        Xpub::from_str(&descriptor[start..end])
            .map_err(|e| KeyError::InvalidDescriptor(e.to_string()))
    }
}

impl AddressDeriver for DescriptorDeriver {
    fn derive_address(&self, path: &DerivationPath) -> Result<String, KeyError> {
        let secp = Secp256k1::new();

        let chain_child = ChildNumber::from_normal_idx(path.chain.child_index())
            .map_err(|e| KeyError::Derivation(e.to_string()))?;
        let index_child = ChildNumber::from_normal_idx(path.index)
            .map_err(|e| KeyError::Derivation(e.to_string()))?;

        let derived = self
            .xpub
            .derive_pub(&secp, &[chain_child, index_child])
            .map_err(|e| KeyError::Derivation(e.to_string()))?;

        let pubkey = PublicKey::new(derived.public_key);
        let compressed = CompressedPublicKey::try_from(pubkey)
            .map_err(|e| KeyError::Derivation(e.to_string()))?;

        Ok(Address::p2wpkh(&compressed, self.network).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    #[test]
    fn derives_deterministic_distinct_addresses() {
        let deriver = DescriptorDeriver::from_descriptor(XPUB, Network::Bitcoin)
            .expect("failed to build deriver");

        let first = deriver
            .derive_address(&DerivationPath::new(
                DerivationScheme::bip84(),
                Chain::Receive,
                0,
            ))
            .expect("failed to derive first address");
        let second = deriver
            .derive_address(&DerivationPath::new(
                DerivationScheme::bip84(),
                Chain::Receive,
                1,
            ))
            .expect("failed to derive second address");
        let first_again = deriver
            .derive_address(&DerivationPath::new(
                DerivationScheme::bip84(),
                Chain::Receive,
                0,
            ))
            .expect("failed to re-derive first address");

        assert_ne!(first, second);
        assert_eq!(first, first_again);
        assert!(first.starts_with("bc1q"));
    }

    #[test]
    fn extracts_xpub_from_wrapped_descriptor() {
        let descriptor = format!("wpkh([bd4c46f7/84'/0'/0']{}/0/*)", XPUB);
        let deriver = DescriptorDeriver::from_descriptor(&descriptor, Network::Bitcoin)
            .expect("failed to parse descriptor");
        let bare = DescriptorDeriver::from_descriptor(XPUB, Network::Bitcoin).unwrap();

        let path = DerivationPath::new(DerivationScheme::bip84(), Chain::Change, 3);
        assert_eq!(
            deriver.derive_address(&path).unwrap(),
            bare.derive_address(&path).unwrap()
        );
    }
}
