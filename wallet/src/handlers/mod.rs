// Per-chain dispatch. Every piece of chain-specific behavior the engine
// needs is reachable through the ChainHandler trait; the ChainType tag
// is the only chain identity that appears anywhere else.

pub mod codec;

mod account;
mod utxo;

use crate::{
    error::WalletError,
    network::{Checkpoint, NetworkFee},
    transfer::{Transfer, TransferDirection},
    wallet::LedgerEntry,
};
use codec::ParsedTransaction;
use indexmap::IndexMap;
use polywallet_common::{
    address::Address,
    amount::Amount,
    chain::{AddressScheme, ChainType, SyncMode},
    currency::{Currency, Unit},
    fee_basis::FeeBasis,
    hash::TxHash,
    keys::Secret,
};
use primitive_types::U256;
use std::{
    collections::HashSet,
    sync::{Arc, OnceLock},
};

// The handler's static description of a chain instance, assembled into
// a Network by the caller
pub struct NetworkParts {
    pub name: String,
    pub currency: Arc<Currency>,
    // Base unit first, default display unit last
    pub units: Vec<Arc<Unit>>,
    pub confirmations: u32,
    pub checkpoints: Vec<Checkpoint>,
    pub modes: &'static [SyncMode],
    pub fees: Vec<NetworkFee>,
}

// What one parsed transaction means to one wallet
#[derive(Debug, Clone)]
pub struct TransferAnalysis {
    // Touches this wallet at all
    pub relevant: bool,
    // False when an owned spend references a transaction the wallet has
    // not seen yet; the caller parks the transaction until it resolves
    pub resolved: bool,
    pub direction: TransferDirection,
    // Base units, always a magnitude
    pub amount: U256,
    // Fee attributable to this wallet's user, when computable
    pub fee: Option<U256>,
    pub source: Address,
    pub target: Address,
}

// Inputs to transaction construction, snapshotted from the wallet under
// its lock before the handler runs
pub struct BuildContext<'a> {
    pub owned: &'a HashSet<Address>,
    pub ledger: &'a IndexMap<TxHash, LedgerEntry>,
    pub change_address: Address,
    pub source_address: Address,
    // Next nonce or sequence number for account chains
    pub counter: u64,
    // Fee in base units the transaction must carry
    pub fee: U256,
}

pub trait ChainHandler: Send + Sync {
    fn chain(&self) -> ChainType;

    // Account material
    fn derive_public_material(&self, seed: &Secret) -> Vec<u8>;
    fn validate_material(&self, material: &[u8]) -> bool;

    // Network description
    fn network_parts(&self, mainnet: bool) -> NetworkParts;
    fn supported_modes(&self) -> &'static [SyncMode];

    // Unsupported requests are normalized silently, never rejected
    fn normalize_mode(&self, requested: SyncMode) -> SyncMode {
        if self.supported_modes().contains(&requested) {
            requested
        } else {
            self.supported_modes()[0]
        }
    }

    // Addresses and hashes
    fn parse_address(&self, s: &str) -> Result<Address, WalletError>;
    fn receive_address(
        &self,
        material: &[u8],
        scheme: AddressScheme,
        index: u32,
        mainnet: bool,
    ) -> Address;
    fn address_for_public(&self, public: &[u8], scheme: AddressScheme, mainnet: bool) -> Address;
    fn parse_hash(&self, hex_str: &str) -> Result<TxHash, WalletError>;

    // Transaction codec
    fn parse_transaction(&self, raw: &[u8]) -> Result<ParsedTransaction, WalletError>;
    fn serialize_transaction(&self, tx: &ParsedTransaction) -> Vec<u8>;

    // Wallet-facing operations
    fn analyze_transaction(
        &self,
        tx: &ParsedTransaction,
        owned: &HashSet<Address>,
        ledger: &IndexMap<TxHash, LedgerEntry>,
    ) -> TransferAnalysis;
    fn compute_balance(
        &self,
        unit: &Arc<Unit>,
        owned: &HashSet<Address>,
        ledger: &IndexMap<TxHash, LedgerEntry>,
        transfers: &[Arc<Transfer>],
    ) -> Amount;
    fn build_transaction(
        &self,
        ctx: &BuildContext,
        outputs: &[(Address, U256)],
    ) -> Result<ParsedTransaction, WalletError>;
    fn estimate_cost_factor(&self, tx: &ParsedTransaction) -> f64;
    fn confirmed_fee_basis(
        &self,
        tx: &ParsedTransaction,
        ledger: &IndexMap<TxHash, LedgerEntry>,
        unit: &Arc<Unit>,
    ) -> Option<FeeBasis>;

    // Signing. The production signer is a pluggable collaborator; these
    // produce the engine's deterministic stand-in signatures.
    fn sign_transaction(&self, tx: &mut ParsedTransaction, seed: &Secret)
        -> Result<(), WalletError>;
    fn sign_with_secret(
        &self,
        tx: &mut ParsedTransaction,
        secret: &[u8],
    ) -> Result<(), WalletError>;

    // Exactly one chain answers true: its transaction hash is assigned
    // by the network at submission time
    fn hash_assigned_at_submission(&self) -> bool {
        false
    }

    // Transfer attributes applicable to a target on this chain
    fn attribute_keys(&self) -> &'static [&'static str] {
        &[]
    }

    fn validate_attributes(&self, attributes: &IndexMap<String, String>) -> Result<(), WalletError> {
        for key in attributes.keys() {
            if !self.attribute_keys().contains(&key.as_str()) {
                return Err(WalletError::InvalidAttribute(key.clone()));
            }
        }
        Ok(())
    }
}

static REGISTRY: OnceLock<Vec<Box<dyn ChainHandler>>> = OnceLock::new();

// Handler lookup. Registration happens on first use, not at load time.
pub fn handler(chain: ChainType) -> &'static dyn ChainHandler {
    let registry = REGISTRY.get_or_init(|| {
        vec![
            Box::new(utxo::UtxoHandler::bitcoin()) as Box<dyn ChainHandler>,
            Box::new(utxo::UtxoHandler::litecoin()),
            Box::new(utxo::UtxoHandler::dogecoin()),
            Box::new(account::AccountChainHandler::ethereum()),
            Box::new(account::AccountChainHandler::stellar()),
        ]
    });

    registry
        .iter()
        .map(|h| &**h)
        .find(|h| h.chain() == chain)
        .expect("registry covers the closed chain enumeration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_registry_covers_every_chain() {
        for chain in ChainType::iter() {
            assert_eq!(handler(chain).chain(), chain);
        }
    }

    #[test]
    fn test_mode_normalization_is_silent() {
        for chain in ChainType::iter() {
            let h = handler(chain);
            for mode in [
                SyncMode::ApiOnly,
                SyncMode::ApiWithP2pSend,
                SyncMode::P2pWithApiSync,
                SyncMode::P2pOnly,
            ] {
                let normalized = h.normalize_mode(mode);
                assert!(h.supported_modes().contains(&normalized));
            }
        }
    }

    #[test]
    fn test_exactly_one_chain_assigns_hash_at_submission() {
        let count = ChainType::iter()
            .filter(|c| handler(*c).hash_assigned_at_submission())
            .count();
        assert_eq!(count, 1);
    }
}
