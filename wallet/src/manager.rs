// The active object: one network's worth of activity for one account.
// A single state lock serializes lifecycle transitions; chain I/O always
// happens outside it. Overlapping connect/disconnect/sync requests
// coalesce instead of stacking.

use crate::{
    client::Client,
    error::WalletError,
    events::{
        DisconnectReason, EventQueue, Listener, ManagerEvent, ManagerEventRecord, ManagerState,
        QueuedEvent, SyncStoppedReason, TransferEvent, TransferEventRecord, WalletEvent,
        WalletEventRecord,
    },
    handlers::{self, ChainHandler},
    network::Network,
    reconcile,
    storage::FileService,
    sync::{ClientSync, P2pEvent, P2pManager, PeerTransport, QryManager},
    system::System,
    transfer::{SubmitError, Transfer, TransferState},
    wallet::Wallet,
};
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};
use polywallet_common::{
    account::Account,
    address::Address,
    amount::Amount,
    chain::{AddressScheme, SyncDepth, SyncMode},
    currency::{Currency, Unit},
    fee_basis::FeeBasis,
    hash::digest,
    keys::Secret,
    time::get_current_time_in_seconds,
    utils::truncate_detail,
};
use std::{
    path::Path,
    sync::{Arc, Mutex, OnceLock, Weak},
};

struct SyncBook {
    last_synced_height: u64,
    depth: Option<SyncDepth>,
}

pub struct WalletManager {
    uids: String,
    system: Weak<System>,
    account: Arc<Account>,
    network: Arc<Network>,
    scheme: AddressScheme,
    client: Arc<dyn Client>,
    events: EventQueue,
    file_service: Arc<FileService>,
    state: Mutex<ManagerState>,
    mode: Mutex<SyncMode>,
    wallets: Mutex<Vec<Arc<Wallet>>>,
    qry: OnceLock<Arc<QryManager>>,
    p2p: OnceLock<Option<Arc<P2pManager>>>,
    sync_book: Mutex<SyncBook>,
    self_weak: OnceLock<Weak<WalletManager>>,
}

impl WalletManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        system: &Arc<System>,
        account: Arc<Account>,
        network: Arc<Network>,
        mode: SyncMode,
        scheme: AddressScheme,
        client: Arc<dyn Client>,
        transport: Option<Arc<dyn PeerTransport>>,
        listener: Arc<dyn Listener>,
        base_path: &Path,
    ) -> Result<Arc<Self>, WalletError> {
        let handler = handlers::handler(network.chain());
        if !handler.validate_material(account.material(network.chain())) {
            return Err(WalletError::InvalidAccountMaterial(network.chain()));
        }
        let mode = Self::usable_mode(handler, mode, transport.is_some());

        let uids = format!(
            "{}-{}",
            network.uids(),
            &hex::encode(digest(account.uids().as_bytes()))[..8]
        );
        let file_service = Arc::new(FileService::create(base_path, &uids)?);
        let events = EventQueue::spawn(listener);

        let creation_height = network.block_number_at_or_before(account.timestamp());
        let manager = Arc::new(Self {
            uids,
            system: Arc::downgrade(system),
            account,
            network,
            scheme,
            client,
            events,
            file_service,
            state: Mutex::new(ManagerState::Created),
            mode: Mutex::new(mode),
            wallets: Mutex::new(Vec::new()),
            qry: OnceLock::new(),
            p2p: OnceLock::new(),
            sync_book: Mutex::new(SyncBook {
                last_synced_height: creation_height,
                depth: None,
            }),
            self_weak: OnceLock::new(),
        });

        let weak = Arc::downgrade(&manager);
        let _ = manager.self_weak.set(weak.clone());
        let _ = manager
            .qry
            .set(QryManager::new(weak.clone(), manager.client.clone()));
        let _ = manager
            .p2p
            .set(transport.map(|t| P2pManager::new(weak.clone(), t)));

        manager.init_primary_wallet(&weak);
        Ok(manager)
    }

    // Modes a chain does not support are silently normalized, and any
    // P2P flavor without a bound transport falls back to API-only
    fn usable_mode(
        handler: &'static dyn ChainHandler,
        requested: SyncMode,
        has_transport: bool,
    ) -> SyncMode {
        let normalized = handler.normalize_mode(requested);
        if !has_transport && (normalized.sends_via_p2p() || normalized.syncs_via_p2p()) {
            SyncMode::ApiOnly
        } else {
            normalized
        }
    }

    fn init_primary_wallet(&self, weak: &Weak<WalletManager>) {
        self.publish_manager_event(ManagerEvent::Created);

        let fees = self.network.fees();
        let price = fees
            .first()
            .map(|f| f.price_per_cost_factor.clone())
            .unwrap_or_else(|| Amount::zero(self.network.base_unit()));
        let default_fee_basis = FeeBasis::new(price, 1.0)
            .expect("builtin fee schedule is well formed");

        let wallet = Wallet::new(
            weak,
            Arc::clone(&self.network),
            Arc::clone(self.network.currency()),
            Arc::clone(self.network.base_unit()),
            Arc::clone(self.network.default_unit()),
            self.scheme,
            self.account.material(self.network.chain()).to_vec(),
            default_fee_basis,
        );

        self.publish_wallet_event(&wallet, WalletEvent::Created);
        self.publish_manager_event(ManagerEvent::WalletAdded {
            currency: wallet.currency().uids().to_string(),
        });
        self.wallets.lock().unwrap().push(wallet);
    }

    fn weak(&self) -> Weak<WalletManager> {
        self.self_weak
            .get()
            .cloned()
            .expect("self weak set at creation")
    }

    pub fn uids(&self) -> &str {
        &self.uids
    }

    pub fn system(&self) -> Option<Arc<System>> {
        self.system.upgrade()
    }

    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn scheme(&self) -> AddressScheme {
        self.scheme
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap()
    }

    pub fn mode(&self) -> SyncMode {
        *self.mode.lock().unwrap()
    }

    pub(crate) fn file_service(&self) -> &Arc<FileService> {
        &self.file_service
    }

    // Where this manager persists its entities; accessed only by this
    // manager while it runs
    pub fn storage_root(&self) -> &Path {
        self.file_service.root()
    }

    pub(crate) fn qry(&self) -> Arc<QryManager> {
        Arc::clone(self.qry.get().expect("qry manager set at creation"))
    }

    pub(crate) fn p2p(&self) -> Option<Arc<P2pManager>> {
        self.p2p.get().and_then(|p| p.clone())
    }

    // The sync client reads go through under the current mode
    fn active_sync(&self) -> Arc<dyn ClientSync> {
        if self.mode().syncs_via_p2p() {
            if let Some(p2p) = self.p2p() {
                return p2p;
            }
        }
        self.qry()
    }

    // The sync client submissions go through under the current mode
    fn submit_route(&self) -> Arc<dyn ClientSync> {
        if self.mode().sends_via_p2p() {
            if let Some(p2p) = self.p2p() {
                return p2p;
            }
        }
        self.qry()
    }

    pub fn wallets(&self) -> Vec<Arc<Wallet>> {
        self.wallets.lock().unwrap().clone()
    }

    // The native-currency wallet created with the manager
    pub fn primary_wallet(&self) -> Arc<Wallet> {
        self.wallets.lock().unwrap()[0].clone()
    }

    pub fn wallet_for_currency(&self, currency_uids: &str) -> Option<Arc<Wallet>> {
        self.wallets
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.currency().uids() == currency_uids)
            .cloned()
    }

    // Track another currency on this network; reconciliation will then
    // route its bundles into the new wallet
    pub fn register_currency(
        &self,
        currency: Arc<Currency>,
        base_unit: Arc<Unit>,
        default_unit: Arc<Unit>,
    ) -> Arc<Wallet> {
        if let Some(existing) = self.wallet_for_currency(currency.uids()) {
            return existing;
        }

        let fees = self.network.fees();
        let price = fees
            .first()
            .map(|f| f.price_per_cost_factor.clone())
            .unwrap_or_else(|| Amount::zero(self.network.base_unit()));
        // Fee schedules are denominated in the network's native unit;
        // a token wallet still pays fees there but tracks its own unit
        let default_fee_basis = FeeBasis::new(price, 1.0)
            .expect("builtin fee schedule is well formed");

        let wallet = Wallet::new(
            &self.weak(),
            Arc::clone(&self.network),
            currency,
            base_unit,
            default_unit,
            self.scheme,
            self.account.material(self.network.chain()).to_vec(),
            default_fee_basis,
        );

        self.publish_wallet_event(&wallet, WalletEvent::Created);
        self.publish_manager_event(ManagerEvent::WalletAdded {
            currency: wallet.currency().uids().to_string(),
        });
        self.wallets.lock().unwrap().push(wallet.clone());
        wallet
    }

    // ---- lifecycle ----------------------------------------------------

    // Idempotent: event delivery runs from construction; start exists so
    // embedders can pair it with stop
    pub fn start(&self) {
        trace!("manager {} started", self.uids);
    }

    // Reload persisted chain data after a restart. Registration is
    // idempotent, so replaying on top of live state is harmless.
    pub async fn restore(self: &Arc<Self>) {
        let wallet = self.primary_wallet();

        match self.file_service.load::<crate::storage::StoredTransaction>() {
            Ok(mut stored) => {
                stored.sort_by_key(|t| t.height);
                for record in stored {
                    match wallet.handler().parse_transaction(&record.raw) {
                        Ok(tx) => {
                            reconcile::admit_transaction(
                                self,
                                &wallet,
                                tx,
                                record.height as u64,
                                record.timestamp as u64,
                            )
                            .await
                        }
                        Err(error) => {
                            warn!("skipping unreadable persisted transaction: {}", error)
                        }
                    }
                }
            }
            Err(error) => warn!("failed to load persisted transactions: {}", error),
        }

        match self.file_service.load::<crate::storage::StoredBundle>() {
            Ok(stored) => {
                let bundles: Vec<polywallet_common::api::TransferBundle> = stored
                    .iter()
                    .filter_map(|b| serde_json::from_slice(&b.json).ok())
                    .collect();
                if !bundles.is_empty() {
                    reconcile::ingest_transfer_bundles(self, bundles).await;
                }
            }
            Err(error) => warn!("failed to load persisted bundles: {}", error),
        }
    }

    pub async fn connect(self: &Arc<Self>, peer: Option<String>) -> Result<(), WalletError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ManagerState::Created | ManagerState::Disconnected { .. } => {
                    let old = *state;
                    *state = ManagerState::Connected;
                    self.publish_manager_event(ManagerEvent::Changed {
                        old,
                        new: ManagerState::Connected,
                    });
                }
                // Coalesced: an ongoing connection or sync absorbs the call
                ManagerState::Connected | ManagerState::Syncing => return Ok(()),
                ManagerState::Deleted => return Err(WalletError::Deleted),
            }
        }

        if let Err(error) = self.active_sync().connect(peer).await {
            warn!("connect failed for {}: {}", self.uids, error);
            self.disconnect_with_reason(DisconnectReason::Unknown);
            return Err(error);
        }

        self.start_sync().await;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.active_sync().cancel_sync().await;
        // No-op unless a sync was actually running
        self.sync_stopped(SyncStoppedReason::Requested);
        self.disconnect_with_reason(DisconnectReason::Requested);
        self.active_sync().disconnect().await;
    }

    // Force a fresh sync from the previously completed height
    pub async fn sync(self: &Arc<Self>) -> Result<(), WalletError> {
        match self.state() {
            ManagerState::Created | ManagerState::Disconnected { .. } => self.connect(None).await,
            ManagerState::Connected => {
                // A finished sync leaves its poll task behind; a forced
                // sync replaces it
                self.active_sync().cancel_sync().await;
                self.start_sync().await;
                Ok(())
            }
            ManagerState::Syncing => {
                self.active_sync().cancel_sync().await;
                self.sync_stopped(SyncStoppedReason::Requested);
                self.start_sync().await;
                Ok(())
            }
            ManagerState::Deleted => Err(WalletError::Deleted),
        }
    }

    pub async fn sync_to_depth(self: &Arc<Self>, depth: SyncDepth) -> Result<(), WalletError> {
        self.sync_book.lock().unwrap().depth = Some(depth);
        self.sync().await
    }

    // Orderly stop/restart when the mode changes while syncing
    pub async fn set_mode(self: &Arc<Self>, requested: SyncMode) {
        let handler = handlers::handler(self.network.chain());
        let normalized = Self::usable_mode(handler, requested, self.p2p().is_some());

        let old_sync = self.active_sync();
        {
            let mode = self.mode.lock().unwrap();
            if *mode == normalized {
                return;
            }
        }

        let was_syncing = matches!(self.state(), ManagerState::Syncing);
        if was_syncing {
            old_sync.cancel_sync().await;
            self.sync_stopped(SyncStoppedReason::Requested);
        }
        old_sync.disconnect().await;

        *self.mode.lock().unwrap() = normalized;
        debug!("manager {} now in mode {}", self.uids, normalized);

        if matches!(self.state(), ManagerState::Connected) && was_syncing {
            if self.active_sync().connect(None).await.is_ok() {
                self.start_sync().await;
            }
        }
    }

    // Halt event handling without disconnecting; teardown path
    pub async fn stop(&self) {
        self.qry().cancel_sync().await;
        if let Some(p2p) = self.p2p() {
            p2p.cancel_sync().await;
        }
        self.events.stop().await;
    }

    // Terminal: after this the manager only answers accessors
    pub async fn delete(&self) {
        self.disconnect().await;
        {
            let mut state = self.state.lock().unwrap();
            let old = *state;
            if !matches!(old, ManagerState::Deleted) {
                *state = ManagerState::Deleted;
                self.publish_manager_event(ManagerEvent::Changed {
                    old,
                    new: ManagerState::Deleted,
                });
            }
        }
        for wallet in self.wallets() {
            self.publish_wallet_event(&wallet, WalletEvent::Deleted);
        }
        self.publish_manager_event(ManagerEvent::Deleted);
        self.stop().await;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.qry().set_reachable(reachable);
        if let Some(p2p) = self.p2p() {
            p2p.set_reachable(reachable);
        }
    }

    // ---- sync bookkeeping (called by the sync clients) ----------------

    async fn start_sync(self: &Arc<Self>) {
        let start = self.sync_start_height().await;
        self.active_sync().begin_sync(start).await;
    }

    // Translate the requested depth (or the default bookmark) into a
    // concrete starting block
    async fn sync_start_height(self: &Arc<Self>) -> u64 {
        let depth = self.sync_book.lock().unwrap().depth.take();
        match depth {
            None => self.sync_book.lock().unwrap().last_synced_height,
            Some(SyncDepth::FromCreation) => self
                .network
                .block_number_at_or_before(self.account.timestamp()),
            Some(SyncDepth::FromLastTrustedBlock) => {
                self.sync_book.lock().unwrap().last_synced_height
            }
            Some(SyncDepth::FromLastConfirmedSend) => {
                let mut best: Option<u64> = None;
                for wallet in self.wallets() {
                    for transfer in wallet.transfers().await {
                        if let TransferState::Included { block_number, .. } = transfer.state() {
                            if matches!(
                                transfer.direction(),
                                crate::transfer::TransferDirection::Sent
                            ) {
                                best = Some(best.map_or(block_number, |b| b.max(block_number)));
                            }
                        }
                    }
                }
                best.unwrap_or_else(|| {
                    self.network
                        .block_number_at_or_before(self.account.timestamp())
                })
            }
        }
    }

    pub(crate) fn sync_started(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, ManagerState::Connected) {
            self.publish_manager_event(ManagerEvent::SyncStarted);
            *state = ManagerState::Syncing;
            self.publish_manager_event(ManagerEvent::Changed {
                old: ManagerState::Connected,
                new: ManagerState::Syncing,
            });
            true
        } else {
            false
        }
    }

    pub(crate) fn sync_progress(&self, height: Option<u64>, percent: f32) {
        self.publish_manager_event(ManagerEvent::SyncContinues { height, percent });
    }

    pub(crate) fn sync_stopped(&self, reason: SyncStoppedReason) -> bool {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, ManagerState::Syncing) {
            self.publish_manager_event(ManagerEvent::SyncStopped { reason });
            *state = ManagerState::Connected;
            self.publish_manager_event(ManagerEvent::Changed {
                old: ManagerState::Syncing,
                new: ManagerState::Connected,
            });
            true
        } else {
            false
        }
    }

    pub(crate) fn disconnect_with_reason(&self, reason: DisconnectReason) {
        let mut state = self.state.lock().unwrap();
        match *state {
            ManagerState::Connected | ManagerState::Syncing => {
                let old = *state;
                *state = ManagerState::Disconnected { reason };
                self.publish_manager_event(ManagerEvent::Changed {
                    old,
                    new: ManagerState::Disconnected { reason },
                });
            }
            _ => {}
        }
    }

    pub(crate) async fn announce_block_number(&self, height: u64, verified_hash: Option<String>) {
        if let Some(hex_hash) = verified_hash {
            let handler = handlers::handler(self.network.chain());
            match handler.parse_hash(&hex_hash) {
                Ok(hash) => self.network.set_verified_hash(Some(hash)),
                Err(error) => debug!("ignoring unparseable verified hash: {}", error),
            }
        }
        if self.network.set_height(height) {
            self.publish_manager_event(ManagerEvent::BlockHeightUpdated { height });
        }
    }

    pub(crate) fn record_synced_height(&self, height: u64) {
        let mut book = self.sync_book.lock().unwrap();
        if height > book.last_synced_height {
            book.last_synced_height = height;
        }
    }

    pub(crate) fn last_synced_height(&self) -> u64 {
        self.sync_book.lock().unwrap().last_synced_height
    }

    // Addresses every wallet watches, for remote-index queries
    pub(crate) async fn scan_addresses(&self) -> Vec<String> {
        let mut all = IndexSet::new();
        for wallet in self.wallets() {
            let inner = wallet.inner().await;
            all.extend(wallet.addresses_for_scan(&inner));
        }
        all.into_iter().collect()
    }

    // ---- reconciliation entry points ----------------------------------

    pub(crate) async fn ingest_transaction_bundles(
        self: &Arc<Self>,
        bundles: Vec<polywallet_common::api::TransactionBundle>,
    ) {
        reconcile::ingest_transaction_bundles(self, bundles).await;
    }

    pub(crate) async fn ingest_transfer_bundles(
        self: &Arc<Self>,
        bundles: Vec<polywallet_common::api::TransferBundle>,
    ) {
        reconcile::ingest_transfer_bundles(self, bundles).await;
    }

    pub(crate) async fn apply_p2p_event(self: &Arc<Self>, event: P2pEvent) {
        reconcile::apply_p2p_event(self, event).await;
    }

    // ---- submission and estimation ------------------------------------

    // Sign with the account seed and hand the transfer to the network
    // through whichever route the mode prescribes. A failure moves the
    // transfer to Errored and leaves the manager untouched.
    pub async fn submit_transfer(
        self: &Arc<Self>,
        wallet: &Arc<Wallet>,
        transfer: &Arc<Transfer>,
        seed: &Secret,
    ) -> Result<(), WalletError> {
        let handler = wallet.handler();
        let mut tx = transfer.staged().ok_or(WalletError::UnknownTransfer)?;

        // Sweep transfers arrive pre-signed with their own key; anything
        // still in Created state signs with the account seed here
        if matches!(transfer.state(), TransferState::Created) {
            handler.sign_transaction(&mut tx, seed)?;
            transfer.replace_staged(tx.clone());
            if !handler.hash_assigned_at_submission() {
                transfer.assign_hash(tx.hash())?;
            }
            if let Ok(Some((old, new))) = transfer.set_state(TransferState::Signed) {
                self.publish_transfer_changed(wallet, transfer, old, new);
            }
        }

        let raw = handler.serialize_transaction(&tx);
        match self.submit_route().submit(raw).await {
            Ok(hash) => {
                match transfer.assign_hash(hash) {
                    Ok(true) => {
                        // The network assigned the hash; that is a change,
                        // never a creation
                        let state = transfer.state();
                        self.publish_transfer_changed(wallet, transfer, state.clone(), state);
                    }
                    Ok(false) => {}
                    Err(error) => {
                        self.fail_transfer(
                            wallet,
                            transfer,
                            SubmitError::Unknown {
                                detail: "hash mismatch on submit".into(),
                            },
                        );
                        return Err(error);
                    }
                }

                if let Ok(Some((old, new))) = transfer.set_state(TransferState::Submitted) {
                    self.publish_transfer_changed(wallet, transfer, old, new);
                }
                self.publish_wallet_event(
                    wallet,
                    WalletEvent::TransferSubmitted {
                        transfer: transfer.uids().to_string(),
                    },
                );

                // The pending spend joins the ledger so the balance
                // reflects it immediately
                reconcile::admit_transaction(self, wallet, tx, 0, get_current_time_in_seconds())
                    .await;
                Ok(())
            }
            Err(error) => {
                warn!("submission failed: {}", error);
                let submit_error = match &error {
                    polywallet_common::api::ClientError::LostConnectivity => SubmitError::Posix {
                        errno: crate::config::ERRNO_NOT_CONNECTED,
                    },
                    polywallet_common::api::ClientError::Unavailable => SubmitError::Posix {
                        errno: crate::config::ERRNO_CONNECTION_REFUSED,
                    },
                    other => SubmitError::Unknown {
                        detail: truncate_detail(&other.to_string()),
                    },
                };
                self.fail_transfer(wallet, transfer, submit_error);
                Err(WalletError::Client(error))
            }
        }
    }

    // Replace a wallet's default fee basis, announcing the change
    pub async fn update_default_fee_basis(&self, wallet: &Arc<Wallet>, fee_basis: FeeBasis) {
        if wallet.set_default_fee_basis(fee_basis.clone()).await {
            self.publish_wallet_event(wallet, WalletEvent::FeeBasisUpdated { fee_basis });
        }
    }

    fn fail_transfer(&self, wallet: &Arc<Wallet>, transfer: &Arc<Transfer>, error: SubmitError) {
        let errored = TransferState::Errored { error };
        if let Ok(Some((old, new))) = transfer.set_state(errored) {
            self.publish_transfer_changed(wallet, transfer, old, new);
        }
    }

    // Asynchronous fee estimation. The cookie comes back in the event so
    // the caller can correlate without holding transient state.
    pub async fn estimate_fee_basis(
        self: &Arc<Self>,
        wallet: &Arc<Wallet>,
        cookie: u64,
        target: Address,
        amount: Amount,
        attributes: IndexMap<String, String>,
    ) {
        let result = self
            .estimate_fee_inner(wallet, target, amount, attributes)
            .await;

        let (status, fee_basis) = match result {
            Ok(basis) => (polywallet_common::error::Status::Success, Some(basis)),
            Err(error) => {
                debug!("fee estimation failed: {}", error);
                (error.status(), None)
            }
        };
        self.publish_wallet_event(
            wallet,
            WalletEvent::FeeBasisEstimated {
                cookie,
                status,
                fee_basis,
            },
        );
    }

    async fn estimate_fee_inner(
        self: &Arc<Self>,
        wallet: &Arc<Wallet>,
        target: Address,
        amount: Amount,
        attributes: IndexMap<String, String>,
    ) -> Result<FeeBasis, WalletError> {
        let handler = wallet.handler();
        handler.validate_attributes(&attributes)?;
        if amount.is_negative() {
            return Err(WalletError::NumericParse(amount.to_string()));
        }

        let fees = self.network.fees();
        let price = fees
            .first()
            .map(|f| f.price_per_cost_factor.clone())
            .unwrap_or_else(|| Amount::zero(self.network.base_unit()));

        // Snapshot under the wallet lock, then do any remote call with
        // the lock released
        let tx = {
            let inner = wallet.inner().await;
            let owned = wallet.owned_addresses(&inner);
            let ctx = crate::handlers::BuildContext {
                owned: &owned,
                ledger: &inner.ledger,
                change_address: wallet.address_at(self.scheme, inner.next_receive_index),
                source_address: wallet.address_at(self.scheme, 0),
                counter: wallet.outgoing_count(&inner),
                fee: price.to_base().0,
            };
            handler.build_transaction(&ctx, &[(target, amount.to_base().0)])?
        };

        let cost_factor = if self.mode().syncs_via_p2p() {
            // Local computation on the P2P path
            handler.estimate_cost_factor(&tx)
        } else {
            let raw = handler.serialize_transaction(&tx);
            let estimate = self
                .client
                .estimate_transaction_fee(self.network.uids(), &raw, &tx.hash().to_hex())
                .await?;
            estimate.cost_units as f64
        };

        FeeBasis::new(price, cost_factor)
            .ok_or_else(|| WalletError::NumericParse(format!("cost factor {}", cost_factor)))
    }

    // ---- event publication --------------------------------------------

    pub(crate) fn publish_manager_event(&self, event: ManagerEvent) {
        self.events.publish(QueuedEvent::Manager(ManagerEventRecord {
            manager: self.weak(),
            event,
        }));
    }

    pub(crate) fn publish_wallet_event(&self, wallet: &Arc<Wallet>, event: WalletEvent) {
        self.events.publish(QueuedEvent::Wallet(WalletEventRecord {
            manager: self.weak(),
            wallet: Arc::downgrade(wallet),
            event,
        }));
    }

    fn publish_transfer_event(
        &self,
        wallet: &Arc<Wallet>,
        transfer: &Arc<Transfer>,
        event: TransferEvent,
    ) {
        self.events
            .publish(QueuedEvent::Transfer(TransferEventRecord {
                manager: self.weak(),
                wallet: Arc::downgrade(wallet),
                transfer: Arc::downgrade(transfer),
                event,
            }));
    }

    pub(crate) fn publish_transfer_created(&self, wallet: &Arc<Wallet>, transfer: &Arc<Transfer>) {
        self.publish_transfer_event(wallet, transfer, TransferEvent::Created);
        self.publish_wallet_event(
            wallet,
            WalletEvent::TransferAdded {
                transfer: transfer.uids().to_string(),
            },
        );
    }

    pub(crate) fn publish_transfer_changed(
        &self,
        wallet: &Arc<Wallet>,
        transfer: &Arc<Transfer>,
        old: TransferState,
        new: TransferState,
    ) {
        self.publish_transfer_event(wallet, transfer, TransferEvent::Changed { old, new });
        self.publish_wallet_event(
            wallet,
            WalletEvent::TransferChanged {
                transfer: transfer.uids().to_string(),
            },
        );
    }

    pub(crate) fn publish_transfer_deleted(&self, wallet: &Arc<Wallet>, transfer: &Arc<Transfer>) {
        self.publish_transfer_event(wallet, transfer, TransferEvent::Deleted);
        self.publish_wallet_event(
            wallet,
            WalletEvent::TransferDeleted {
                transfer: transfer.uids().to_string(),
            },
        );
    }
}

impl std::fmt::Debug for WalletManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManager")
            .field("uids", &self.uids)
            .field("state", &self.state().label())
            .field("mode", &self.mode())
            .finish()
    }
}
