// The account-model handler: Ethereum-style (gas) and Stellar-style
// (flat fee, network-assigned hash) chains share one implementation.

use super::{codec::*, BuildContext, ChainHandler, NetworkParts, TransferAnalysis};
use crate::{
    error::WalletError,
    network::{Checkpoint, NetworkFee},
    transfer::{Transfer, TransferDirection},
    wallet::LedgerEntry,
};
use indexmap::IndexMap;
use polywallet_common::{
    account::derive_material,
    address::Address,
    amount::Amount,
    chain::{AddressScheme, ChainType, SyncMode},
    currency::{Currency, CurrencyKind, Unit},
    fee_basis::FeeBasis,
    hash::{digest, TxHash},
    keys::Secret,
    serializer::Serializer,
};
use primitive_types::U256;
use std::{collections::HashSet, sync::Arc};

const ETHEREUM_MODES: &[SyncMode] = &[SyncMode::ApiOnly, SyncMode::ApiWithP2pSend];
const STELLAR_MODES: &[SyncMode] = &[SyncMode::ApiOnly];

struct AccountParams {
    chain: ChainType,
    name: &'static str,
    currency_name: &'static str,
    base_unit: (&'static str, &'static str),
    default_unit: (&'static str, &'static str),
    decimals: u8,
    address_prefix: &'static str,
    payload_len: usize,
    uppercase: bool,
    confirmations: u32,
    // Units of work one plain value transfer costs
    default_cost_factor: f64,
    // Base units per unit of work
    default_price: u64,
    modes: &'static [SyncMode],
    hash_at_submission: bool,
    checkpoints_mainnet: &'static [(u64, u64)],
    checkpoints_testnet: &'static [(u64, u64)],
    attribute_keys: &'static [&'static str],
}

pub(super) struct AccountChainHandler {
    params: AccountParams,
}

impl AccountChainHandler {
    pub fn ethereum() -> Self {
        Self {
            params: AccountParams {
                chain: ChainType::Ethereum,
                name: "Ethereum",
                currency_name: "Ether",
                base_unit: ("wei", "wei"),
                default_unit: ("eth", "Ξ"),
                decimals: 18,
                address_prefix: "0x",
                payload_len: 20,
                uppercase: false,
                confirmations: 12,
                default_cost_factor: 21_000.0,
                default_price: 20_000_000_000,
                modes: ETHEREUM_MODES,
                hash_at_submission: false,
                checkpoints_mainnet: &[
                    (0, 1_438_269_973),
                    (4_000_000, 1_499_633_567),
                    (8_000_000, 1_561_100_149),
                    (13_000_000, 1_629_500_000),
                ],
                checkpoints_testnet: &[(0, 1_479_642_530), (9_000_000, 1_610_000_000)],
                attribute_keys: &[],
            },
        }
    }

    pub fn stellar() -> Self {
        Self {
            params: AccountParams {
                chain: ChainType::Stellar,
                name: "Stellar",
                currency_name: "Lumen",
                base_unit: ("stroop", "STROOP"),
                default_unit: ("xlm", "*"),
                decimals: 7,
                address_prefix: "G",
                payload_len: 32,
                uppercase: true,
                confirmations: 1,
                default_cost_factor: 1.0,
                default_price: 100,
                modes: STELLAR_MODES,
                // The one chain whose hash arrives with the submission
                // acknowledgement rather than at construction
                hash_at_submission: true,
                checkpoints_mainnet: &[(0, 1_443_571_200), (30_000_000, 1_590_000_000)],
                checkpoints_testnet: &[(0, 1_443_571_200)],
                attribute_keys: &["memo", "memo_type"],
            },
        }
    }

    fn render(&self, payload: &[u8]) -> String {
        let body = hex::encode(payload);
        if self.params.uppercase {
            format!("{}{}", self.params.address_prefix, body.to_uppercase())
        } else {
            format!("{}{}", self.params.address_prefix, body)
        }
    }
}

impl ChainHandler for AccountChainHandler {
    fn chain(&self) -> ChainType {
        self.params.chain
    }

    fn derive_public_material(&self, seed: &Secret) -> Vec<u8> {
        derive_material(self.params.chain, seed)
    }

    fn validate_material(&self, material: &[u8]) -> bool {
        match self.params.chain {
            ChainType::Ethereum => material.len() == 64,
            _ => material.len() == 32,
        }
    }

    fn network_parts(&self, mainnet: bool) -> NetworkParts {
        let network_uids = crate::network::Network::make_uids(self.params.chain, mainnet);
        let currency = Currency::new(
            format!("{}:__native__", network_uids),
            self.params.currency_name,
            self.params.default_unit.0,
            CurrencyKind::Native,
            None,
        );
        let base = Unit::base(&currency, self.params.base_unit.0, self.params.base_unit.1);
        let default = Unit::derived(
            &currency,
            self.params.default_unit.0,
            self.params.default_unit.1,
            &base,
            self.params.decimals,
        );

        let checkpoints = if mainnet {
            self.params.checkpoints_mainnet
        } else {
            self.params.checkpoints_testnet
        };

        NetworkParts {
            name: format!(
                "{} {}",
                self.params.name,
                if mainnet { "Mainnet" } else { "Testnet" }
            ),
            currency,
            fees: vec![NetworkFee {
                confirmation_time_ms: 60 * 1_000,
                price_per_cost_factor: Amount::from_base(&base, self.params.default_price),
            }],
            units: vec![base, default],
            confirmations: self.params.confirmations,
            checkpoints: checkpoints
                .iter()
                .map(|(block_number, timestamp)| Checkpoint {
                    block_number: *block_number,
                    timestamp: *timestamp,
                })
                .collect(),
            modes: self.params.modes,
        }
    }

    fn supported_modes(&self) -> &'static [SyncMode] {
        self.params.modes
    }

    fn parse_address(&self, s: &str) -> Result<Address, WalletError> {
        let invalid = || WalletError::InvalidAddress(s.to_string());

        let body = s.strip_prefix(self.params.address_prefix).ok_or_else(invalid)?;
        let payload = hex::decode(body.to_lowercase()).map_err(|_| invalid())?;
        if payload.len() != self.params.payload_len {
            return Err(invalid());
        }

        Ok(Address::from_parts(
            self.params.chain,
            None,
            payload,
            s.to_string(),
        ))
    }

    // Account chains have one address per account; scheme and index do
    // not vary it
    fn receive_address(
        &self,
        material: &[u8],
        _scheme: AddressScheme,
        _index: u32,
        mainnet: bool,
    ) -> Address {
        self.address_for_public(material, AddressScheme::Native, mainnet)
    }

    fn address_for_public(&self, public: &[u8], _scheme: AddressScheme, _mainnet: bool) -> Address {
        let payload = digest(public)[..self.params.payload_len].to_vec();
        let rendered = self.render(&payload);
        Address::from_parts(self.params.chain, None, payload, rendered)
    }

    fn parse_hash(&self, hex_str: &str) -> Result<TxHash, WalletError> {
        TxHash::from_hex(self.params.chain, hex_str)
            .map_err(|_| WalletError::InvalidHash(hex_str.to_string()))
    }

    fn parse_transaction(&self, raw: &[u8]) -> Result<ParsedTransaction, WalletError> {
        let tx = ParsedTransaction::from_bytes(raw)?;
        if tx.chain != self.params.chain || !matches!(tx.body, TxBody::Account { .. }) {
            return Err(WalletError::InvalidHash(format!(
                "transaction is not a {} transaction",
                self.params.chain
            )));
        }
        Ok(tx)
    }

    fn serialize_transaction(&self, tx: &ParsedTransaction) -> Vec<u8> {
        tx.to_bytes()
    }

    // Direction comes straight from sender/receiver membership
    fn analyze_transaction(
        &self,
        tx: &ParsedTransaction,
        owned: &HashSet<Address>,
        _ledger: &IndexMap<TxHash, LedgerEntry>,
    ) -> TransferAnalysis {
        let fallback = Address::from_parts(self.params.chain, None, vec![], String::new());
        let (source, target, value, fee) = match &tx.body {
            TxBody::Account {
                source,
                target,
                value,
                fee,
                ..
            } => (source.clone(), target.clone(), *value, *fee),
            _ => {
                return TransferAnalysis {
                    relevant: false,
                    resolved: true,
                    direction: TransferDirection::Received,
                    amount: U256::zero(),
                    fee: None,
                    source: fallback.clone(),
                    target: fallback,
                }
            }
        };

        let sent = owned.contains(&source);
        let received = owned.contains(&target);
        let (direction, fee) = match (sent, received) {
            (true, true) => (TransferDirection::Recovered, Some(fee)),
            (true, false) => (TransferDirection::Sent, Some(fee)),
            _ => (TransferDirection::Received, None),
        };

        TransferAnalysis {
            relevant: sent || received,
            resolved: true,
            direction,
            amount: value,
            fee,
            source,
            target,
        }
    }

    // Account balances are the algebraic sum over contributing transfers
    fn compute_balance(
        &self,
        unit: &Arc<Unit>,
        _owned: &HashSet<Address>,
        _ledger: &IndexMap<TxHash, LedgerEntry>,
        transfers: &[Arc<Transfer>],
    ) -> Amount {
        let mut balance = Amount::zero(unit);
        for transfer in transfers {
            if let Some(next) = balance.checked_add(&transfer.balance_contribution()) {
                balance = next;
            }
        }
        balance
    }

    fn build_transaction(
        &self,
        ctx: &BuildContext,
        outputs: &[(Address, U256)],
    ) -> Result<ParsedTransaction, WalletError> {
        let (target, value) = outputs
            .first()
            .cloned()
            .ok_or(WalletError::InsufficientFunds)?;
        if outputs.len() > 1 {
            // One movement per transaction on account chains
            return Err(WalletError::UnsupportedChainOperation(self.params.chain));
        }

        Ok(ParsedTransaction {
            chain: self.params.chain,
            body: TxBody::Account {
                source: ctx.source_address.clone(),
                target,
                value,
                fee: ctx.fee,
                counter: ctx.counter,
            },
            signature: None,
        })
    }

    fn estimate_cost_factor(&self, _tx: &ParsedTransaction) -> f64 {
        self.params.default_cost_factor
    }

    fn confirmed_fee_basis(
        &self,
        tx: &ParsedTransaction,
        _ledger: &IndexMap<TxHash, LedgerEntry>,
        unit: &Arc<Unit>,
    ) -> Option<FeeBasis> {
        match &tx.body {
            TxBody::Account { fee, .. } => FeeBasis::from_actual(
                Amount::from_base_signed(unit, *fee, false),
                self.params.default_cost_factor,
            ),
            _ => None,
        }
    }

    fn sign_transaction(
        &self,
        tx: &mut ParsedTransaction,
        seed: &Secret,
    ) -> Result<(), WalletError> {
        let secret = blake3::derive_key(
            &format!("polywallet sign {} v1", self.params.chain.code()),
            seed.as_bytes(),
        );
        self.sign_with_secret(tx, &secret)
    }

    fn sign_with_secret(
        &self,
        tx: &mut ParsedTransaction,
        secret: &[u8],
    ) -> Result<(), WalletError> {
        let preimage = tx.preimage();
        let mut material = Vec::with_capacity(secret.len() + preimage.len());
        material.extend_from_slice(secret);
        material.extend_from_slice(&preimage);
        let first = digest(&material);
        let second = digest(&first);
        let mut signature = Vec::with_capacity(64);
        signature.extend_from_slice(&first);
        signature.extend_from_slice(&second);
        tx.signature = Some(signature);
        Ok(())
    }

    fn hash_assigned_at_submission(&self) -> bool {
        self.params.hash_at_submission
    }

    fn attribute_keys(&self) -> &'static [&'static str] {
        self.params.attribute_keys
    }
}
