// The top-level aggregate: one account, one client, one listener, one
// root path, and the wallet managers built on top of them. Creating a
// manager through the system is the only way managers come into being.

use crate::{
    client::Client,
    error::WalletError,
    events::{
        EventQueue, Listener, NetworkEvent, NetworkEventRecord, QueuedEvent, SystemEvent,
        SystemEventRecord,
    },
    manager::WalletManager,
    network::{Network, NetworkFee},
    storage,
    sync::PeerTransport,
};
use log::info;
use polywallet_common::{
    account::Account,
    chain::{AddressScheme, ChainType, SyncMode},
};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, OnceLock, Weak},
};
use strum::IntoEnumIterator;

pub struct System {
    account: Arc<Account>,
    path: PathBuf,
    client: Arc<dyn Client>,
    listener: Arc<dyn Listener>,
    events: EventQueue,
    networks: Vec<Arc<Network>>,
    managers: Mutex<Vec<Arc<WalletManager>>>,
    self_weak: OnceLock<Weak<System>>,
}

impl System {
    // Must run within a tokio runtime: event dispatch starts here
    pub fn create(
        account: Arc<Account>,
        path: impl Into<PathBuf>,
        client: Arc<dyn Client>,
        listener: Arc<dyn Listener>,
    ) -> Arc<Self> {
        let mut networks = Vec::new();
        for chain in ChainType::iter() {
            for mainnet in [true, false] {
                networks.push(Network::builtin(chain, mainnet));
            }
        }

        let events = EventQueue::spawn(Arc::clone(&listener));
        let system = Arc::new(Self {
            account,
            path: path.into(),
            client,
            listener,
            events,
            networks,
            managers: Mutex::new(Vec::new()),
            self_weak: OnceLock::new(),
        });
        let _ = system.self_weak.set(Arc::downgrade(&system));

        system.publish_system_event(SystemEvent::Created);
        for network in &system.networks {
            system.publish_network_event(network, NetworkEvent::Created);
            system.publish_system_event(SystemEvent::NetworkAdded {
                network: network.uids().to_string(),
            });
        }

        system
    }

    fn weak(&self) -> Weak<System> {
        self.self_weak
            .get()
            .cloned()
            .expect("self weak set at creation")
    }

    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn networks(&self) -> &[Arc<Network>] {
        &self.networks
    }

    pub fn network(&self, chain: ChainType, mainnet: bool) -> Option<Arc<Network>> {
        self.networks
            .iter()
            .find(|n| n.chain() == chain && n.is_mainnet() == mainnet)
            .cloned()
    }

    pub fn managers(&self) -> Vec<Arc<WalletManager>> {
        self.managers.lock().unwrap().clone()
    }

    // Build a wallet manager for one of this system's networks. The
    // peer transport is bound here or never; without one, P2P modes
    // normalize to API-only.
    pub fn create_manager(
        self: &Arc<Self>,
        network: &Arc<Network>,
        mode: SyncMode,
        scheme: AddressScheme,
        transport: Option<Arc<dyn PeerTransport>>,
    ) -> Result<Arc<WalletManager>, WalletError> {
        let manager = WalletManager::create(
            self,
            Arc::clone(&self.account),
            Arc::clone(network),
            mode,
            scheme,
            Arc::clone(&self.client),
            transport,
            Arc::clone(&self.listener),
            &self.path,
        )?;

        self.managers.lock().unwrap().push(Arc::clone(&manager));
        self.publish_system_event(SystemEvent::ManagerAdded {
            manager: manager.uids().to_string(),
        });
        info!("created manager {}", manager.uids());
        Ok(manager)
    }

    pub fn start(&self) {
        for manager in self.managers() {
            manager.start();
        }
    }

    // Replace a network's fee schedule, typically from a fresh quote the
    // embedder fetched out of band
    pub fn update_network_fees(&self, network: &Arc<Network>, fees: Vec<NetworkFee>) {
        if network.set_fees(fees) {
            self.publish_network_event(network, NetworkEvent::FeesUpdated);
        }
    }

    pub async fn connect_all(self: &Arc<Self>) {
        for manager in self.managers() {
            let _ = manager.connect(None).await;
        }
    }

    pub async fn disconnect_all(&self) {
        for manager in self.managers() {
            manager.disconnect().await;
        }
    }

    pub async fn stop(&self) {
        for manager in self.managers() {
            manager.stop().await;
        }
        self.events.stop().await;
    }

    // Remove everything persisted under `path` with a portable
    // directory walk
    pub fn wipe(path: &Path) -> Result<(), WalletError> {
        storage::remove_tree(path)?;
        Ok(())
    }

    fn publish_system_event(&self, event: SystemEvent) {
        self.events.publish(QueuedEvent::System(SystemEventRecord {
            system: self.weak(),
            event,
        }));
    }

    fn publish_network_event(&self, network: &Arc<Network>, event: NetworkEvent) {
        self.events.publish(QueuedEvent::Network(NetworkEventRecord {
            network: Arc::downgrade(network),
            event,
        }));
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("account", &self.account.uids())
            .field("managers", &self.managers.lock().unwrap().len())
            .finish()
    }
}
