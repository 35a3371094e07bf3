// The UTXO family handler: Bitcoin plus the forks that share its
// accounting model. One implementation, parameterized per chain.

use super::{codec::*, BuildContext, ChainHandler, NetworkParts, TransferAnalysis};
use crate::{
    config::DUST_THRESHOLD,
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
    serializer::{Serializer, Writer},
};
use primitive_types::U256;
use std::{
    collections::HashSet,
    sync::Arc,
};

const UTXO_MODES: &[SyncMode] = &[SyncMode::ApiOnly, SyncMode::P2pWithApiSync, SyncMode::P2pOnly];

// Estimated unlocking-data bytes per input once signed
const SIGNATURE_WEIGHT: usize = 80;

struct UtxoParams {
    chain: ChainType,
    name: &'static str,
    currency_name: &'static str,
    base_unit: (&'static str, &'static str),
    default_unit: (&'static str, &'static str),
    decimals: u8,
    hrp_mainnet: &'static str,
    hrp_testnet: &'static str,
    legacy_prefix: &'static str,
    confirmations: u32,
    // Base units per virtual kilobyte
    default_fee_per_kb: u64,
    checkpoints_mainnet: &'static [(u64, u64)],
    checkpoints_testnet: &'static [(u64, u64)],
}

pub(super) struct UtxoHandler {
    params: UtxoParams,
}

impl UtxoHandler {
    pub fn bitcoin() -> Self {
        Self {
            params: UtxoParams {
                chain: ChainType::Bitcoin,
                name: "Bitcoin",
                currency_name: "Bitcoin",
                base_unit: ("sat", "SAT"),
                default_unit: ("btc", "₿"),
                decimals: 8,
                hrp_mainnet: "bc",
                hrp_testnet: "tb",
                legacy_prefix: "1",
                confirmations: 6,
                default_fee_per_kb: 10_000,
                checkpoints_mainnet: &[
                    (0, 1_231_006_505),
                    (210_000, 1_349_226_660),
                    (420_000, 1_468_082_773),
                    (630_000, 1_589_225_023),
                    (700_000, 1_631_884_800),
                ],
                checkpoints_testnet: &[
                    (0, 1_296_688_602),
                    (1_000_000, 1_476_873_476),
                    (2_000_000, 1_630_000_000),
                ],
            },
        }
    }

    pub fn litecoin() -> Self {
        Self {
            params: UtxoParams {
                chain: ChainType::Litecoin,
                name: "Litecoin",
                currency_name: "Litecoin",
                base_unit: ("lit", "LIT"),
                default_unit: ("ltc", "Ł"),
                decimals: 8,
                hrp_mainnet: "ltc",
                hrp_testnet: "tltc",
                legacy_prefix: "L",
                confirmations: 12,
                default_fee_per_kb: 10_000,
                checkpoints_mainnet: &[
                    (0, 1_317_972_665),
                    (1_000_000, 1_464_611_622),
                    (2_000_000, 1_631_000_000),
                ],
                checkpoints_testnet: &[(0, 1_486_949_366)],
            },
        }
    }

    pub fn dogecoin() -> Self {
        Self {
            params: UtxoParams {
                chain: ChainType::Dogecoin,
                name: "Dogecoin",
                currency_name: "Dogecoin",
                base_unit: ("koinu", "KOINU"),
                default_unit: ("doge", "Ð"),
                decimals: 8,
                hrp_mainnet: "doge",
                hrp_testnet: "tdge",
                legacy_prefix: "D",
                confirmations: 40,
                default_fee_per_kb: 100_000_000,
                checkpoints_mainnet: &[
                    (0, 1_386_325_540),
                    (3_000_000, 1_573_000_000),
                    (4_000_000, 1_640_000_000),
                ],
                checkpoints_testnet: &[(0, 1_391_503_289)],
            },
        }
    }

    fn child_public(&self, material: &[u8], scheme: AddressScheme, index: u32) -> [u8; 32] {
        let mut writer = Writer::new();
        writer.write_bytes(material);
        writer.write_u8(match scheme {
            AddressScheme::Native => 0,
            AddressScheme::Legacy => 1,
        });
        writer.write_u32(index);
        digest(writer.as_bytes())
    }

    fn render(&self, payload: &[u8], scheme: AddressScheme, mainnet: bool) -> String {
        match scheme {
            AddressScheme::Native => {
                let hrp = if mainnet {
                    self.params.hrp_mainnet
                } else {
                    self.params.hrp_testnet
                };
                format!("{}1{}", hrp, hex::encode(payload))
            }
            AddressScheme::Legacy => format!("{}{}", self.params.legacy_prefix, hex::encode(payload)),
        }
    }

    fn payload_address(
        &self,
        payload: [u8; 20],
        scheme: AddressScheme,
        mainnet: bool,
    ) -> Address {
        let rendered = self.render(&payload, scheme, mainnet);
        Address::from_parts(self.params.chain, Some(scheme), payload.to_vec(), rendered)
    }
}

// The set of outputs the wallet can spend right now
pub(crate) struct Utxo {
    pub hash: TxHash,
    pub index: u32,
    pub value: U256,
    pub owner: Address,
}

pub(crate) fn collect_utxos(
    owned: &HashSet<Address>,
    ledger: &IndexMap<TxHash, LedgerEntry>,
) -> Vec<Utxo> {
    let mut spent: HashSet<(TxHash, u32)> = HashSet::new();
    for entry in ledger.values() {
        if let TxBody::Utxo { inputs, .. } = &entry.tx.body {
            for input in inputs {
                spent.insert((input.prev_hash.clone(), input.prev_index));
            }
        }
    }

    let mut utxos = Vec::new();
    for (hash, entry) in ledger {
        if let TxBody::Utxo { outputs, .. } = &entry.tx.body {
            for (index, output) in outputs.iter().enumerate() {
                let index = index as u32;
                if owned.contains(&output.target) && !spent.contains(&(hash.clone(), index)) {
                    utxos.push(Utxo {
                        hash: hash.clone(),
                        index,
                        value: output.value,
                        owner: output.target.clone(),
                    });
                }
            }
        }
    }
    utxos
}

impl ChainHandler for UtxoHandler {
    fn chain(&self) -> ChainType {
        self.params.chain
    }

    fn derive_public_material(&self, seed: &Secret) -> Vec<u8> {
        derive_material(self.params.chain, seed)
    }

    fn validate_material(&self, material: &[u8]) -> bool {
        material.len() == 33
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
                confirmation_time_ms: 10 * 60 * 1_000,
                price_per_cost_factor: Amount::from_base(&base, self.params.default_fee_per_kb),
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
            modes: UTXO_MODES,
        }
    }

    fn supported_modes(&self) -> &'static [SyncMode] {
        UTXO_MODES
    }

    fn parse_address(&self, s: &str) -> Result<Address, WalletError> {
        let invalid = || WalletError::InvalidAddress(s.to_string());

        let (scheme, payload_hex) = if let Some(rest) =
            s.strip_prefix(&format!("{}1", self.params.hrp_mainnet))
        {
            (AddressScheme::Native, rest)
        } else if let Some(rest) = s.strip_prefix(&format!("{}1", self.params.hrp_testnet)) {
            (AddressScheme::Native, rest)
        } else if let Some(rest) = s.strip_prefix(self.params.legacy_prefix) {
            (AddressScheme::Legacy, rest)
        } else {
            return Err(invalid());
        };

        let payload = hex::decode(payload_hex).map_err(|_| invalid())?;
        if payload.len() != 20 {
            return Err(invalid());
        }

        Ok(Address::from_parts(
            self.params.chain,
            Some(scheme),
            payload,
            s.to_string(),
        ))
    }

    fn receive_address(
        &self,
        material: &[u8],
        scheme: AddressScheme,
        index: u32,
        mainnet: bool,
    ) -> Address {
        let public = self.child_public(material, scheme, index);
        self.address_for_public(&public, scheme, mainnet)
    }

    fn address_for_public(&self, public: &[u8], scheme: AddressScheme, mainnet: bool) -> Address {
        let mut payload = [0u8; 20];
        payload.copy_from_slice(&digest(public)[..20]);
        self.payload_address(payload, scheme, mainnet)
    }

    fn parse_hash(&self, hex_str: &str) -> Result<TxHash, WalletError> {
        TxHash::from_hex(self.params.chain, hex_str)
            .map_err(|_| WalletError::InvalidHash(hex_str.to_string()))
    }

    fn parse_transaction(&self, raw: &[u8]) -> Result<ParsedTransaction, WalletError> {
        let tx = ParsedTransaction::from_bytes(raw)?;
        if tx.chain != self.params.chain || !matches!(tx.body, TxBody::Utxo { .. }) {
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

    // The (send, receive, fee) decomposition and the direction rules.
    // `send` is the value of owned outputs this transaction consumes,
    // `receive` the value of owned outputs it creates.
    fn analyze_transaction(
        &self,
        tx: &ParsedTransaction,
        owned: &HashSet<Address>,
        ledger: &IndexMap<TxHash, LedgerEntry>,
    ) -> TransferAnalysis {
        let fallback = Address::from_parts(self.params.chain, None, vec![], String::new());
        let (inputs, outputs) = match &tx.body {
            TxBody::Utxo { inputs, outputs } => (inputs, outputs),
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

        let resolve = |input: &TxInput| -> Option<U256> {
            ledger
                .get(&input.prev_hash)
                .and_then(|entry| match &entry.tx.body {
                    TxBody::Utxo { outputs, .. } => {
                        outputs.get(input.prev_index as usize).map(|o| o.value)
                    }
                    _ => None,
                })
        };

        let receive: U256 = outputs
            .iter()
            .filter(|o| owned.contains(&o.target))
            .fold(U256::zero(), |acc, o| acc.saturating_add(o.value));

        let mut send = U256::zero();
        let mut resolved = true;
        let mut spends_owned = false;
        for input in inputs.iter().filter(|i| owned.contains(&i.spender)) {
            spends_owned = true;
            match resolve(input) {
                Some(value) => send = send.saturating_add(value),
                None => resolved = false,
            }
        }

        // The full fee needs every input's previous output
        let total_out: U256 = outputs.iter().fold(U256::zero(), |acc, o| acc.saturating_add(o.value));
        let mut total_in = Some(U256::zero());
        for input in inputs {
            total_in = match (total_in, resolve(input)) {
                (Some(acc), Some(value)) => Some(acc.saturating_add(value)),
                _ => None,
            };
        }
        let fee = total_in.and_then(|total| total.checked_sub(total_out));

        let relevant = spends_owned || !receive.is_zero();
        let fee_value = fee.unwrap_or_else(U256::zero);

        let first_spender = inputs.first().map(|i| i.spender.clone());
        let first_output = outputs.first().map(|o| o.target.clone());
        let first_owned_output = outputs
            .iter()
            .map(|o| o.target.clone())
            .find(|t| owned.contains(t));
        let first_foreign_output = outputs
            .iter()
            .map(|o| o.target.clone())
            .find(|t| !owned.contains(t));

        enum Class {
            Received,
            Recovered,
            Sent(U256),
        }

        let class = if send.is_zero() {
            Class::Received
        } else {
            match send.checked_sub(fee_value) {
                Some(net) if net == receive => Class::Recovered,
                Some(net) if net > receive => Class::Sent(net - receive),
                _ => Class::Received,
            }
        };

        let (direction, amount, fee, source, target) = match class {
            Class::Received => (
                TransferDirection::Received,
                receive,
                None,
                first_spender
                    .or_else(|| first_output.clone())
                    .unwrap_or_else(|| fallback.clone()),
                first_owned_output.or(first_output).unwrap_or(fallback),
            ),
            Class::Recovered => (
                TransferDirection::Recovered,
                send,
                fee,
                first_spender.unwrap_or_else(|| fallback.clone()),
                first_output.unwrap_or(fallback),
            ),
            Class::Sent(amount) => (
                TransferDirection::Sent,
                amount,
                fee,
                first_spender.unwrap_or_else(|| fallback.clone()),
                first_foreign_output.or(first_output).unwrap_or(fallback),
            ),
        };

        TransferAnalysis {
            relevant,
            resolved,
            direction,
            amount,
            fee,
            source,
            target,
        }
    }

    // Balance comes from the UTXO set, never from re-summing transfers
    fn compute_balance(
        &self,
        unit: &Arc<Unit>,
        owned: &HashSet<Address>,
        ledger: &IndexMap<TxHash, LedgerEntry>,
        _transfers: &[Arc<Transfer>],
    ) -> Amount {
        let total = collect_utxos(owned, ledger)
            .iter()
            .fold(U256::zero(), |acc, utxo| acc.saturating_add(utxo.value));
        Amount::from_base_signed(unit, total, false)
    }

    fn build_transaction(
        &self,
        ctx: &BuildContext,
        outputs: &[(Address, U256)],
    ) -> Result<ParsedTransaction, WalletError> {
        let mut utxos = collect_utxos(ctx.owned, ctx.ledger);
        utxos.sort_by(|a, b| b.value.cmp(&a.value));

        let payment: U256 = outputs.iter().fold(U256::zero(), |acc, (_, v)| acc.saturating_add(*v));
        let needed = payment + ctx.fee;

        let mut selected = Vec::new();
        let mut covered = U256::zero();
        for utxo in utxos {
            if covered >= needed {
                break;
            }
            covered = covered.saturating_add(utxo.value);
            selected.push(utxo);
        }
        if covered < needed {
            return Err(WalletError::InsufficientFunds);
        }

        let inputs = selected
            .iter()
            .map(|utxo| TxInput {
                prev_hash: utxo.hash.clone(),
                prev_index: utxo.index,
                spender: utxo.owner.clone(),
                signature: vec![],
            })
            .collect();

        let mut outs: Vec<TxOutput> = outputs
            .iter()
            .map(|(target, value)| TxOutput {
                value: *value,
                target: target.clone(),
            })
            .collect();

        let change = covered - needed;
        if change > U256::from(DUST_THRESHOLD) {
            outs.push(TxOutput {
                value: change,
                target: ctx.change_address.clone(),
            });
        }

        Ok(ParsedTransaction {
            chain: self.params.chain,
            body: TxBody::Utxo {
                inputs,
                outputs: outs,
            },
            signature: None,
        })
    }

    // Virtual size in kilobytes
    fn estimate_cost_factor(&self, tx: &ParsedTransaction) -> f64 {
        let unsigned_inputs = match &tx.body {
            TxBody::Utxo { inputs, .. } => {
                inputs.iter().filter(|i| i.signature.is_empty()).count()
            }
            _ => 0,
        };
        (tx.size() + unsigned_inputs * SIGNATURE_WEIGHT) as f64 / 1_000.0
    }

    fn confirmed_fee_basis(
        &self,
        tx: &ParsedTransaction,
        ledger: &IndexMap<TxHash, LedgerEntry>,
        unit: &Arc<Unit>,
    ) -> Option<FeeBasis> {
        let analysis = self.analyze_transaction(tx, &HashSet::new(), ledger);
        let fee = analysis.fee?;
        FeeBasis::from_actual(
            Amount::from_base_signed(unit, fee, false),
            self.estimate_cost_factor(tx),
        )
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
        if let TxBody::Utxo { inputs, .. } = &mut tx.body {
            for (index, input) in inputs.iter_mut().enumerate() {
                let mut writer = Writer::new();
                writer.write_bytes(secret);
                writer.write_bytes(&preimage);
                writer.write_u32(index as u32);
                let first = digest(writer.as_bytes());
                let second = digest(&first);
                let mut signature = Vec::with_capacity(64);
                signature.extend_from_slice(&first);
                signature.extend_from_slice(&second);
                input.signature = signature;
            }
        }
        Ok(())
    }
}
