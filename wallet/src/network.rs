use crate::handlers;
use polywallet_common::{
    amount::Amount,
    chain::{ChainType, SyncMode},
    currency::{Currency, Unit},
    hash::TxHash,
    time::TimestampSeconds,
};
use std::sync::{Arc, Mutex};

// A known (block number, timestamp) pair baked into the chain handler.
// Used to translate sync depths and account creation times into a block
// to start scanning from.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pub block_number: u64,
    pub timestamp: TimestampSeconds,
}

// One entry of the network's fee schedule: the price per cost factor
// that historically confirms within the given time
#[derive(Debug, Clone)]
pub struct NetworkFee {
    pub confirmation_time_ms: u64,
    pub price_per_cost_factor: Amount,
}

// Everything the engine knows about one chain instance. Immutable apart
// from the observed height, the verified block hash and the fee
// schedule.
pub struct Network {
    uids: String,
    name: String,
    chain: ChainType,
    mainnet: bool,
    currency: Arc<Currency>,
    units: Vec<Arc<Unit>>,
    base_unit: Arc<Unit>,
    default_unit: Arc<Unit>,
    confirmations: u32,
    supported_modes: &'static [SyncMode],
    checkpoints: Vec<Checkpoint>,
    height: Mutex<u64>,
    verified_hash: Mutex<Option<TxHash>>,
    fees: Mutex<Vec<NetworkFee>>,
}

impl Network {
    // The sole constructor: assembled from the chain handler's
    // description of itself
    pub fn builtin(chain: ChainType, mainnet: bool) -> Arc<Self> {
        let handler = handlers::handler(chain);
        let parts = handler.network_parts(mainnet);

        let base_unit = parts.units.first().expect("base unit").clone();
        let default_unit = parts.units.last().expect("default unit").clone();
        let start_height = parts
            .checkpoints
            .last()
            .map(|c| c.block_number)
            .unwrap_or(0);

        Arc::new(Self {
            uids: Self::make_uids(chain, mainnet),
            name: parts.name,
            chain,
            mainnet,
            currency: parts.currency,
            units: parts.units,
            base_unit,
            default_unit,
            confirmations: parts.confirmations,
            supported_modes: parts.modes,
            checkpoints: parts.checkpoints,
            height: Mutex::new(start_height),
            verified_hash: Mutex::new(None),
            fees: Mutex::new(parts.fees),
        })
    }

    pub fn make_uids(chain: ChainType, mainnet: bool) -> String {
        format!(
            "{}-{}",
            chain,
            if mainnet { "mainnet" } else { "testnet" }
        )
    }

    pub fn uids(&self) -> &str {
        &self.uids
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> ChainType {
        self.chain
    }

    pub fn is_mainnet(&self) -> bool {
        self.mainnet
    }

    pub fn currency(&self) -> &Arc<Currency> {
        &self.currency
    }

    pub fn units(&self) -> &[Arc<Unit>] {
        &self.units
    }

    pub fn base_unit(&self) -> &Arc<Unit> {
        &self.base_unit
    }

    pub fn default_unit(&self) -> &Arc<Unit> {
        &self.default_unit
    }

    pub fn confirmations_until_final(&self) -> u32 {
        self.confirmations
    }

    pub fn supported_modes(&self) -> &'static [SyncMode] {
        self.supported_modes
    }

    pub fn supports_mode(&self, mode: SyncMode) -> bool {
        self.supported_modes.contains(&mode)
    }

    pub fn height(&self) -> u64 {
        *self.height.lock().unwrap()
    }

    // Returns true when the height actually moved
    pub fn set_height(&self, height: u64) -> bool {
        let mut current = self.height.lock().unwrap();
        if *current == height {
            return false;
        }
        *current = height;
        true
    }

    pub fn verified_hash(&self) -> Option<TxHash> {
        self.verified_hash.lock().unwrap().clone()
    }

    pub fn set_verified_hash(&self, hash: Option<TxHash>) {
        *self.verified_hash.lock().unwrap() = hash;
    }

    pub fn fees(&self) -> Vec<NetworkFee> {
        self.fees.lock().unwrap().clone()
    }

    // Returns true when the schedule changed
    pub fn set_fees(&self, fees: Vec<NetworkFee>) -> bool {
        let mut current = self.fees.lock().unwrap();
        let changed = current.len() != fees.len()
            || current
                .iter()
                .zip(fees.iter())
                .any(|(a, b)| {
                    a.confirmation_time_ms != b.confirmation_time_ms
                        || a.price_per_cost_factor != b.price_per_cost_factor
                });
        if changed {
            *current = fees;
        }
        changed
    }

    // The latest checkpoint at or before `timestamp`, falling back to
    // the chain origin
    pub fn block_number_at_or_before(&self, timestamp: TimestampSeconds) -> u64 {
        self.checkpoints
            .iter()
            .rev()
            .find(|c| c.timestamp <= timestamp)
            .map(|c| c.block_number)
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("uids", &self.uids)
            .field("height", &self.height())
            .finish()
    }
}
