use crate::{
    error::WalletError,
    handlers::{self, codec::ParsedTransaction, BuildContext, ChainHandler},
    manager::WalletManager,
    network::Network,
    transfer::{Transfer, TransferDirection, TransferState},
};
use indexmap::{IndexMap, IndexSet};
use polywallet_common::{
    address::Address,
    amount::Amount,
    chain::AddressScheme,
    config::ADDRESS_GAP_LIMIT,
    currency::{Currency, Unit},
    fee_basis::FeeBasis,
    hash::TxHash,
};
use std::{
    collections::HashSet,
    sync::{Arc, Weak},
};
use tokio::sync::{Mutex, MutexGuard};

// One transaction the wallet has admitted, with its inclusion metadata.
// Height zero means it is still waiting in the mempool.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub tx: ParsedTransaction,
    pub block_height: u64,
    pub timestamp: u64,
}

// A transaction parked because it spends outputs the wallet has not
// seen yet. Retried whenever new transactions are admitted.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub tx: ParsedTransaction,
    pub block_height: u64,
    pub timestamp: u64,
}

pub struct WalletInner {
    // Insertion-ordered so event emission order is deterministic
    pub(crate) transfers: IndexMap<String, Arc<Transfer>>,
    pub(crate) ledger: IndexMap<TxHash, LedgerEntry>,
    pub(crate) unresolved: Vec<PendingTransaction>,
    pub(crate) balance: Amount,
    pub(crate) default_fee_basis: FeeBasis,
    pub(crate) next_receive_index: u32,
    pub(crate) used_addresses: IndexSet<Address>,
}

// A set of transfers for one currency within one network, plus the
// running balance and the address book. The wallet owns its transfers;
// everything above it is reached through weak links.
pub struct Wallet {
    manager: Weak<WalletManager>,
    network: Arc<Network>,
    currency: Arc<Currency>,
    base_unit: Arc<Unit>,
    default_unit: Arc<Unit>,
    scheme: AddressScheme,
    material: Vec<u8>,
    inner: Mutex<WalletInner>,
}

impl Wallet {
    pub(crate) fn new(
        manager: &Weak<WalletManager>,
        network: Arc<Network>,
        currency: Arc<Currency>,
        base_unit: Arc<Unit>,
        default_unit: Arc<Unit>,
        scheme: AddressScheme,
        material: Vec<u8>,
        default_fee_basis: FeeBasis,
    ) -> Arc<Self> {
        let balance = Amount::zero(&base_unit);
        Arc::new(Self {
            manager: manager.clone(),
            network,
            currency,
            base_unit,
            default_unit,
            scheme,
            material,
            inner: Mutex::new(WalletInner {
                transfers: IndexMap::new(),
                ledger: IndexMap::new(),
                unresolved: Vec::new(),
                balance,
                default_fee_basis,
                next_receive_index: 0,
                used_addresses: IndexSet::new(),
            }),
        })
    }

    pub fn manager(&self) -> Option<Arc<WalletManager>> {
        self.manager.upgrade()
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn currency(&self) -> &Arc<Currency> {
        &self.currency
    }

    pub fn base_unit(&self) -> &Arc<Unit> {
        &self.base_unit
    }

    pub fn default_unit(&self) -> &Arc<Unit> {
        &self.default_unit
    }

    pub fn scheme(&self) -> AddressScheme {
        self.scheme
    }

    pub(crate) fn handler(&self) -> &'static dyn ChainHandler {
        handlers::handler(self.network.chain())
    }

    pub(crate) async fn inner(&self) -> MutexGuard<'_, WalletInner> {
        self.inner.lock().await
    }

    pub async fn balance(&self) -> Amount {
        self.inner.lock().await.balance.clone()
    }

    pub async fn default_fee_basis(&self) -> FeeBasis {
        self.inner.lock().await.default_fee_basis.clone()
    }

    // Returns true when the default changed; the manager turns that
    // into a fee-basis event
    pub(crate) async fn set_default_fee_basis(&self, fee_basis: FeeBasis) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.default_fee_basis == fee_basis {
            return false;
        }
        inner.default_fee_basis = fee_basis;
        true
    }

    pub async fn transfers(&self) -> Vec<Arc<Transfer>> {
        self.inner.lock().await.transfers.values().cloned().collect()
    }

    pub async fn transfer_for_hash(&self, hash: &TxHash) -> Option<Arc<Transfer>> {
        let inner = self.inner.lock().await;
        Self::find_by_hash(&inner, hash)
    }

    pub(crate) fn find_by_hash(inner: &WalletInner, hash: &TxHash) -> Option<Arc<Transfer>> {
        inner
            .transfers
            .values()
            .find(|t| t.hash().as_ref() == Some(hash))
            .cloned()
    }

    // The next unused receive address in the wallet's scheme
    pub async fn receive_address(&self) -> Address {
        let inner = self.inner.lock().await;
        self.address_at(self.scheme, inner.next_receive_index)
    }

    pub(crate) fn address_at(&self, scheme: AddressScheme, index: u32) -> Address {
        self.handler().receive_address(
            &self.material,
            scheme,
            index,
            self.network.is_mainnet(),
        )
    }

    // Every address this wallet watches: the scan window in both
    // schemes plus anything observed used. The standard gap limit keeps
    // the window bounded.
    pub(crate) fn owned_addresses(&self, inner: &WalletInner) -> HashSet<Address> {
        let mut owned = HashSet::new();
        let window = inner.next_receive_index + ADDRESS_GAP_LIMIT;
        for scheme in [AddressScheme::Native, AddressScheme::Legacy] {
            for index in 0..window {
                owned.insert(self.address_at(scheme, index));
            }
        }
        for address in &inner.used_addresses {
            owned.insert(address.clone());
        }
        owned
    }

    // Rendered forms for remote-index queries, scan-window order
    pub(crate) fn addresses_for_scan(&self, inner: &WalletInner) -> Vec<String> {
        let mut seen = IndexSet::new();
        let window = inner.next_receive_index + ADDRESS_GAP_LIMIT;
        for scheme in [self.scheme, AddressScheme::Native, AddressScheme::Legacy] {
            for index in 0..window {
                seen.insert(self.address_at(scheme, index).rendered().to_string());
            }
        }
        for address in &inner.used_addresses {
            seen.insert(address.rendered().to_string());
        }
        seen.into_iter().collect()
    }

    // Record that an owned address appeared on chain and slide the
    // receive index past every used slot
    pub(crate) fn note_used_address(&self, inner: &mut WalletInner, address: Address) {
        inner.used_addresses.insert(address);
        loop {
            let candidate = self.address_at(self.scheme, inner.next_receive_index);
            if inner.used_addresses.contains(&candidate) {
                inner.next_receive_index += 1;
            } else {
                break;
            }
        }
    }

    // Recompute the balance from the ledger (UTXO) or the transfer set
    // (account chains); Some(new) when it moved
    pub(crate) fn recompute_balance(&self, inner: &mut WalletInner) -> Option<Amount> {
        let owned = self.owned_addresses(inner);
        let transfers: Vec<Arc<Transfer>> = inner.transfers.values().cloned().collect();
        let balance =
            self.handler()
                .compute_balance(&self.base_unit, &owned, &inner.ledger, &transfers);
        if balance == inner.balance {
            return None;
        }
        inner.balance = balance.clone();
        Some(balance)
    }

    // Number of outgoing movements, used as the account-chain counter
    pub(crate) fn outgoing_count(&self, inner: &WalletInner) -> u64 {
        inner
            .transfers
            .values()
            .filter(|t| {
                matches!(
                    t.direction(),
                    TransferDirection::Sent | TransferDirection::Recovered
                ) && !matches!(t.state(), TransferState::Errored { .. } | TransferState::Deleted)
            })
            .count() as u64
    }

    // Build an unsigned single-output transfer. The transfer enters the
    // wallet in Created state; submission happens through the manager.
    pub async fn create_transfer(
        self: &Arc<Self>,
        target: Address,
        amount: Amount,
        fee_basis: Option<FeeBasis>,
        attributes: IndexMap<String, String>,
    ) -> Result<Arc<Transfer>, WalletError> {
        self.create_transfer_multiple(vec![(target, amount)], fee_basis, attributes)
            .await
    }

    // Multi-output variant; account chains reject more than one output
    pub async fn create_transfer_multiple(
        self: &Arc<Self>,
        outputs: Vec<(Address, Amount)>,
        fee_basis: Option<FeeBasis>,
        attributes: IndexMap<String, String>,
    ) -> Result<Arc<Transfer>, WalletError> {
        let handler = self.handler();
        handler.validate_attributes(&attributes)?;

        let mut raw_outputs = Vec::with_capacity(outputs.len());
        let mut total = Amount::zero(&self.base_unit);
        for (target, amount) in &outputs {
            if amount.is_negative() || !amount.unit().is_compatible(&self.base_unit) {
                return Err(WalletError::NumericParse(amount.to_string()));
            }
            raw_outputs.push((target.clone(), amount.to_base().0));
            total = total
                .checked_add(amount)
                .ok_or_else(|| WalletError::NumericParse(amount.to_string()))?;
        }

        let mut inner = self.inner.lock().await;
        let fee_basis = fee_basis.unwrap_or_else(|| inner.default_fee_basis.clone());

        let owned = self.owned_addresses(&inner);
        let change = self.address_at(self.scheme, inner.next_receive_index);
        let source = self.address_at(self.scheme, 0);
        let ctx = BuildContext {
            owned: &owned,
            ledger: &inner.ledger,
            change_address: change,
            source_address: source.clone(),
            counter: self.outgoing_count(&inner),
            fee: fee_basis.fee().to_base().0,
        };
        let tx = handler.build_transaction(&ctx, &raw_outputs)?;

        let hash = if handler.hash_assigned_at_submission() {
            None
        } else {
            Some(tx.hash())
        };
        let uids = hash
            .as_ref()
            .map(|h| h.to_hex())
            .unwrap_or_else(|| format!("local-{}", rand::random::<u64>()));

        let target = outputs[0].0.clone();
        let transfer = Transfer::new(
            self,
            uids.clone(),
            source,
            target,
            total,
            TransferDirection::Sent,
            fee_basis,
            attributes,
            hash,
            TransferState::Created,
        );
        transfer.stage(tx);
        inner.transfers.insert(uids, transfer.clone());
        drop(inner);

        if let Some(manager) = self.manager() {
            manager.publish_transfer_created(self, &transfer);
        }

        Ok(transfer)
    }

    // Adopt an externally built, already signed transaction that drains
    // a swept key into this wallet. Enters in Signed state so submission
    // will not re-sign it with the account seed.
    pub(crate) async fn create_sweep_transfer(
        self: &Arc<Self>,
        source: Address,
        target: Address,
        amount: Amount,
        fee_basis: FeeBasis,
        tx: ParsedTransaction,
    ) -> Arc<Transfer> {
        let handler = self.handler();
        let hash = if handler.hash_assigned_at_submission() {
            None
        } else {
            Some(tx.hash())
        };
        let uids = hash
            .as_ref()
            .map(|h| h.to_hex())
            .unwrap_or_else(|| format!("sweep-{}", rand::random::<u64>()));

        let transfer = Transfer::new(
            self,
            uids.clone(),
            source,
            target,
            amount,
            TransferDirection::Received,
            fee_basis,
            IndexMap::new(),
            hash,
            TransferState::Signed,
        );
        transfer.stage(tx);
        self.inner.lock().await.transfers.insert(uids, transfer.clone());

        if let Some(manager) = self.manager() {
            manager.publish_transfer_created(self, &transfer);
        }
        transfer
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.network.uids())
            .field("currency", &self.currency.uids())
            .finish()
    }
}
