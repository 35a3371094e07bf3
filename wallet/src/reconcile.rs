// The transfer reconciliation engine: both ingestion paths (client
// bundles from the remote index, parsed transactions from the peer
// network) merge here into a consistent set of per-wallet transfers.
// Registration is idempotent and order-independent; events per bundle
// come out as transfer-added, then balance-updated, then
// wallet-changed, with earlier sort keys first.

use crate::{
    events::{ManagerEvent, WalletEvent},
    handlers::codec::ParsedTransaction,
    manager::WalletManager,
    storage::{StoredBundle, StoredTransaction},
    transfer::{IncludeStatus, SubmitError, Transfer, TransferDirection, TransferState},
    wallet::{PendingTransaction, Wallet, WalletInner},
};
use log::{debug, trace, warn};
use polywallet_common::{
    amount::Amount,
    api::{BundleStatus, TransactionBundle, TransferBundle},
    chain::SyncDepth,
    fee_basis::FeeBasis,
    hash::{digest, TxHash},
    serializer::Serializer,
    utils::truncate_detail,
};
use std::sync::Arc;

// Raw bytes waiting to be persisted once the wallet lock is released
type PersistQueue = Vec<StoredTransaction>;

pub(crate) async fn ingest_transaction_bundles(
    manager: &Arc<WalletManager>,
    mut bundles: Vec<TransactionBundle>,
) {
    bundles.sort_by(|a, b| {
        (a.block_height, a.identifier.as_str()).cmp(&(b.block_height, b.identifier.as_str()))
    });

    for bundle in bundles {
        let wallet = manager.primary_wallet();
        let tx = match wallet.handler().parse_transaction(&bundle.raw) {
            Ok(tx) => tx,
            Err(error) => {
                warn!(
                    "dropping malformed transaction bundle {}: {}",
                    bundle.identifier, error
                );
                continue;
            }
        };

        match bundle.status {
            BundleStatus::Failed => {
                mark_errored(manager, &wallet, &tx.hash(), "rejected by network").await;
                // Drop any persisted copy so a restart cannot replay it
                let identifier = digest(&tx.to_bytes());
                if let Err(error) = manager
                    .file_service()
                    .remove::<StoredTransaction>(&identifier)
                {
                    warn!("failed to drop rejected transaction: {}", error);
                }
            }
            BundleStatus::Confirmed => {
                admit_transaction(manager, &wallet, tx, bundle.block_height, bundle.timestamp)
                    .await;
            }
            BundleStatus::Submitted => {
                admit_transaction(manager, &wallet, tx, 0, bundle.timestamp).await;
            }
        }
    }
}

pub(crate) async fn ingest_transfer_bundles(
    manager: &Arc<WalletManager>,
    mut bundles: Vec<TransferBundle>,
) {
    bundles.sort_by(|a, b| {
        let ka = (a.block_number, a.transaction_index, a.identifier.clone());
        let kb = (b.block_number, b.transaction_index, b.identifier.clone());
        ka.cmp(&kb)
    });

    for bundle in bundles {
        ingest_transfer_bundle(manager, bundle).await;
    }
}

async fn ingest_transfer_bundle(manager: &Arc<WalletManager>, bundle: TransferBundle) {
    let Some(wallet) = manager.wallet_for_currency(&bundle.currency) else {
        debug!("dropping transfer bundle for untracked currency {}", bundle.currency);
        return;
    };
    let handler = wallet.handler();

    let hash = match handler.parse_hash(&bundle.hash) {
        Ok(hash) => hash,
        Err(error) => {
            warn!("dropping transfer bundle {}: {}", bundle.identifier, error);
            return;
        }
    };
    let (from, to) = match (
        handler.parse_address(&bundle.from),
        handler.parse_address(&bundle.to),
    ) {
        (Ok(from), Ok(to)) => (from, to),
        _ => {
            warn!(
                "dropping transfer bundle {} with unparseable addresses",
                bundle.identifier
            );
            return;
        }
    };
    let Some(amount) = Amount::from_base_string(wallet.base_unit(), &bundle.amount) else {
        warn!(
            "dropping transfer bundle {} with unparseable amount {}",
            bundle.identifier, bundle.amount
        );
        return;
    };
    let fee = bundle
        .fee
        .as_deref()
        .and_then(|f| Amount::from_base_string(wallet.base_unit(), f));

    let attributes = match handler.validate_attributes(&bundle.attributes) {
        Ok(()) => bundle.attributes.clone(),
        Err(error) => {
            debug!(
                "stripping invalid attributes from bundle {}: {}",
                bundle.identifier, error
            );
            Default::default()
        }
    };

    let mut inner = wallet.inner().await;
    let owned = wallet.owned_addresses(&inner);
    let from_owned = owned.contains(&from);
    let to_owned = owned.contains(&to);
    if !from_owned && !to_owned {
        trace!("transfer bundle {} does not touch this wallet", bundle.identifier);
        return;
    }

    let direction = match (from_owned, to_owned) {
        (true, true) => TransferDirection::Recovered,
        (true, false) => TransferDirection::Sent,
        _ => TransferDirection::Received,
    };
    if to_owned {
        wallet.note_used_address(&mut inner, to.clone());
    }

    let confirmed_basis = fee
        .clone()
        .and_then(|f| FeeBasis::from_actual(f, 1.0));
    let state = match bundle.status {
        BundleStatus::Confirmed => TransferState::Included {
            block_number: bundle.block_number,
            block_timestamp: bundle.block_timestamp,
            transaction_index: bundle.transaction_index,
            fee_basis: confirmed_basis.clone(),
            status: IncludeStatus::from_error_detail(bundle.include_error.as_deref()),
        },
        BundleStatus::Submitted => TransferState::Submitted,
        BundleStatus::Failed => TransferState::Errored {
            error: SubmitError::Unknown {
                detail: truncate_detail(
                    bundle.include_error.as_deref().unwrap_or("rejected"),
                ),
            },
        },
    };

    let identity = format!("{}:{}", hash.to_hex(), bundle.index.unwrap_or(0));
    let mut changed = false;

    if let Some(existing) = inner.transfers.get(&identity).cloned() {
        apply_state(manager, &wallet, &existing, state, &mut changed);
    } else {
        let estimated = confirmed_basis.unwrap_or_else(|| inner.default_fee_basis.clone());
        let transfer = Transfer::new(
            &wallet,
            identity.clone(),
            from,
            to,
            amount,
            direction,
            estimated,
            attributes,
            Some(hash),
            state,
        );
        inner.transfers.insert(identity, transfer.clone());
        manager.publish_transfer_created(&wallet, &transfer);
        changed = true;
    }

    finish_wallet_update(manager, &wallet, &mut inner, changed);
    drop(inner);

    // Keep the bundle on disk so this wallet's transfer set survives a
    // restart without another index query
    match serde_json::to_vec(&bundle) {
        Ok(json) => {
            if let Err(error) = manager.file_service().save(&StoredBundle { json }) {
                warn!("failed to persist transfer bundle: {}", error);
            }
        }
        Err(error) => debug!("unserializable transfer bundle: {}", error),
    }
}

// Admit one parsed transaction into the wallet ledger. Height zero
// means mempool. Idempotent: a hash already admitted only refreshes its
// inclusion state.
pub(crate) async fn admit_transaction(
    manager: &Arc<WalletManager>,
    wallet: &Arc<Wallet>,
    tx: ParsedTransaction,
    block_height: u64,
    timestamp: u64,
) {
    let mut persist = PersistQueue::new();
    {
        let mut inner = wallet.inner().await;
        admit_locked(
            manager,
            wallet,
            &mut inner,
            tx,
            block_height,
            timestamp,
            &mut persist,
        );
    }
    persist_admitted(manager, persist);
}

fn admit_locked(
    manager: &Arc<WalletManager>,
    wallet: &Arc<Wallet>,
    inner: &mut WalletInner,
    tx: ParsedTransaction,
    block_height: u64,
    timestamp: u64,
    persist: &mut PersistQueue,
) {
    let handler = wallet.handler();
    let hash = tx.hash();

    if inner.ledger.contains_key(&hash) {
        let changed =
            update_inclusion_locked(manager, wallet, inner, &hash, block_height, timestamp);
        finish_wallet_update(manager, wallet, inner, changed);
        return;
    }

    let owned = wallet.owned_addresses(inner);
    let analysis = handler.analyze_transaction(&tx, &owned, &inner.ledger);
    if !analysis.relevant {
        trace!("ignoring irrelevant transaction {}", hash);
        return;
    }
    if !analysis.resolved {
        if inner.unresolved.iter().any(|p| p.tx.hash() == hash) {
            trace!("transaction {} already parked", hash);
            return;
        }
        debug!("parking unresolved transaction {}", hash);
        inner.unresolved.push(PendingTransaction {
            tx,
            block_height,
            timestamp,
        });
        return;
    }

    insert_resolved_locked(
        manager,
        wallet,
        inner,
        tx,
        block_height,
        timestamp,
        persist,
    );
    retry_unresolved_locked(manager, wallet, inner, persist);
    finish_wallet_update(manager, wallet, inner, true);
}

fn insert_resolved_locked(
    manager: &Arc<WalletManager>,
    wallet: &Arc<Wallet>,
    inner: &mut WalletInner,
    tx: ParsedTransaction,
    block_height: u64,
    timestamp: u64,
    persist: &mut PersistQueue,
) {
    let handler = wallet.handler();
    let hash = tx.hash();
    let owned = wallet.owned_addresses(inner);
    let analysis = handler.analyze_transaction(&tx, &owned, &inner.ledger);

    // Outputs back to this wallet advance the receive index
    for target in [&analysis.target, &analysis.source] {
        if owned.contains(target) {
            wallet.note_used_address(inner, target.clone());
        }
    }

    let stored = StoredTransaction {
        raw: tx.to_bytes(),
        height: block_height as u32,
        timestamp: timestamp as u32,
    };

    let raw_entry = crate::wallet::LedgerEntry {
        tx,
        block_height,
        timestamp,
    };

    let identity = hash.to_hex();
    let existing = inner
        .transfers
        .get(&identity)
        .cloned()
        .or_else(|| Wallet::find_by_hash(inner, &hash));
    if let Some(existing) = existing {
        // A transfer this wallet created locally is now observed on the
        // data source; only its state moves. If the transfer refuses the
        // move (a terminal Errored transfer, say), the observation is
        // dropped wholesale so the ledger never carries outputs the
        // transfer set disowns.
        inner.ledger.insert(hash.clone(), raw_entry);
        let state = if block_height > 0 {
            included_state(handler, inner, &hash, block_height, timestamp, wallet)
        } else {
            TransferState::Submitted
        };
        match existing.set_state(state) {
            Ok(Some((old, new))) => {
                manager.publish_transfer_changed(wallet, &existing, old, new);
                persist.push(stored);
            }
            Ok(None) => persist.push(stored),
            Err(error) => {
                inner.ledger.shift_remove(&hash);
                warn!(
                    "dropping observation of transaction {}: {}",
                    hash, error
                );
            }
        }
        return;
    }

    persist.push(stored);
    inner.ledger.insert(hash.clone(), raw_entry);

    let amount = Amount::from_base_signed(wallet.base_unit(), analysis.amount, false);
    let estimated = analysis
        .fee
        .map(|fee| Amount::from_base_signed(wallet.base_unit(), fee, false))
        .and_then(|fee| FeeBasis::from_actual(fee, 1.0))
        .unwrap_or_else(|| inner.default_fee_basis.clone());

    let state = if block_height > 0 {
        included_state(handler, inner, &hash, block_height, timestamp, wallet)
    } else {
        TransferState::Submitted
    };

    let transfer = Transfer::new(
        wallet,
        identity.clone(),
        analysis.source,
        analysis.target,
        amount,
        analysis.direction,
        estimated,
        Default::default(),
        Some(hash),
        state,
    );
    inner.transfers.insert(identity, transfer.clone());
    manager.publish_transfer_created(wallet, &transfer);
}

fn included_state(
    handler: &'static dyn crate::handlers::ChainHandler,
    inner: &WalletInner,
    hash: &TxHash,
    block_height: u64,
    timestamp: u64,
    wallet: &Arc<Wallet>,
) -> TransferState {
    let fee_basis = inner
        .ledger
        .get(hash)
        .and_then(|entry| handler.confirmed_fee_basis(&entry.tx, &inner.ledger, wallet.base_unit()));
    TransferState::Included {
        block_number: block_height,
        block_timestamp: timestamp,
        transaction_index: 0,
        fee_basis,
        status: IncludeStatus::Success,
    }
}

// A known transaction got new inclusion metadata: confirmation,
// deeper block, or a re-org back into the mempool
fn update_inclusion_locked(
    manager: &Arc<WalletManager>,
    wallet: &Arc<Wallet>,
    inner: &mut WalletInner,
    hash: &TxHash,
    block_height: u64,
    timestamp: u64,
) -> bool {
    if let Some(entry) = inner.ledger.get_mut(hash) {
        entry.block_height = block_height;
        entry.timestamp = timestamp;
    }

    let Some(transfer) = Wallet::find_by_hash(inner, hash) else {
        return false;
    };

    let was_included = transfer.state().is_included();
    let state = if block_height > 0 {
        included_state(wallet.handler(), inner, hash, block_height, timestamp, wallet)
    } else {
        TransferState::Submitted
    };

    let mut changed = false;
    apply_state(manager, wallet, &transfer, state, &mut changed);

    // Falling out of a block is how a re-org looks from here; consumers
    // are warned to resync
    if changed && was_included && block_height == 0 {
        manager.publish_manager_event(ManagerEvent::SyncRecommended {
            depth: SyncDepth::FromLastTrustedBlock,
        });
    }

    changed
}

fn retry_unresolved_locked(
    manager: &Arc<WalletManager>,
    wallet: &Arc<Wallet>,
    inner: &mut WalletInner,
    persist: &mut PersistQueue,
) {
    let handler = wallet.handler();
    let mut progressed = true;
    while progressed {
        progressed = false;
        let pending = std::mem::take(&mut inner.unresolved);
        for item in pending {
            let owned = wallet.owned_addresses(inner);
            let analysis = handler.analyze_transaction(&item.tx, &owned, &inner.ledger);
            if analysis.resolved {
                insert_resolved_locked(
                    manager,
                    wallet,
                    inner,
                    item.tx,
                    item.block_height,
                    item.timestamp,
                    persist,
                );
                progressed = true;
            } else {
                inner.unresolved.push(item);
            }
        }
    }
}

// Emit the per-bundle tail: balance then wallet-changed
fn finish_wallet_update(
    manager: &Arc<WalletManager>,
    wallet: &Arc<Wallet>,
    inner: &mut WalletInner,
    observable_change: bool,
) {
    let balance_moved = wallet.recompute_balance(inner);
    if let Some(balance) = balance_moved {
        manager.publish_wallet_event(wallet, WalletEvent::BalanceUpdated { amount: balance });
    } else if !observable_change {
        return;
    }
    manager.publish_wallet_event(wallet, WalletEvent::Changed);
}

// Transition helper: emits transfer-changed on success, logs and drops
// on an illegal transition (malformed source data never crashes the
// manager)
fn apply_state(
    manager: &Arc<WalletManager>,
    wallet: &Arc<Wallet>,
    transfer: &Arc<Transfer>,
    state: TransferState,
    changed: &mut bool,
) {
    match transfer.set_state(state) {
        Ok(Some((old, new))) => {
            manager.publish_transfer_changed(wallet, transfer, old, new);
            *changed = true;
        }
        Ok(None) => {}
        Err(error) => {
            warn!(
                "dropping state update for transfer {}: {}",
                transfer.uids(),
                error
            );
        }
    }
}

async fn mark_errored(
    manager: &Arc<WalletManager>,
    wallet: &Arc<Wallet>,
    hash: &TxHash,
    detail: &str,
) {
    let mut inner = wallet.inner().await;

    // A rejected transaction no longer exists on chain: its outputs
    // leave the UTXO set and the outputs it spent become spendable
    // again. Errored transfers never contribute to the balance.
    let mut changed = inner.ledger.shift_remove(hash).is_some();

    if let Some(transfer) = Wallet::find_by_hash(&inner, hash) {
        apply_state(
            manager,
            wallet,
            &transfer,
            TransferState::Errored {
                error: SubmitError::Unknown {
                    detail: truncate_detail(detail),
                },
            },
            &mut changed,
        );
    }
    finish_wallet_update(manager, wallet, &mut inner, changed);
}

// Entry point for the four peer-network event kinds
pub(crate) async fn apply_p2p_event(manager: &Arc<WalletManager>, event: crate::sync::P2pEvent) {
    use crate::sync::P2pEvent;

    let wallet = manager.primary_wallet();
    match event {
        P2pEvent::TransactionAdded {
            raw,
            block_height,
            timestamp,
        } => {
            let tx = match wallet.handler().parse_transaction(&raw) {
                Ok(tx) => tx,
                Err(error) => {
                    warn!("dropping malformed peer transaction: {}", error);
                    return;
                }
            };
            admit_transaction(manager, &wallet, tx, block_height, timestamp).await;
        }
        P2pEvent::TransactionsUpdated {
            hashes,
            block_height,
            timestamp,
        } => {
            let mut inner = wallet.inner().await;
            let mut changed = false;
            for hash in hashes {
                changed |= update_inclusion_locked(
                    manager,
                    &wallet,
                    &mut inner,
                    &hash,
                    block_height,
                    timestamp,
                );
            }
            finish_wallet_update(manager, &wallet, &mut inner, changed);
        }
        P2pEvent::TransactionDeleted {
            hash,
            recommend_rescan,
        } => {
            let mut inner = wallet.inner().await;
            inner.ledger.shift_remove(&hash);
            let mut changed = false;
            if let Some(transfer) = Wallet::find_by_hash(&inner, &hash) {
                apply_state(
                    manager,
                    &wallet,
                    &transfer,
                    TransferState::Deleted,
                    &mut changed,
                );
                if changed {
                    manager.publish_transfer_deleted(&wallet, &transfer);
                }
            }
            finish_wallet_update(manager, &wallet, &mut inner, changed);
            if recommend_rescan {
                manager.publish_manager_event(ManagerEvent::SyncRecommended {
                    depth: SyncDepth::FromLastTrustedBlock,
                });
            }
        }
        P2pEvent::BalanceChanged => {
            let mut inner = wallet.inner().await;
            finish_wallet_update(manager, &wallet, &mut inner, false);
        }
    }
}

fn persist_admitted(manager: &Arc<WalletManager>, persist: PersistQueue) {
    for stored in persist {
        if let Err(error) = manager.file_service().save(&stored) {
            warn!("failed to persist transaction: {}", error);
        }
    }
}
