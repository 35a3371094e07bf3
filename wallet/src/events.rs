// Event plumbing. Publishers push onto a per-owner FIFO while holding
// their own locks (pushing never blocks and never calls back); a single
// dispatcher task per queue drains it and invokes the embedder's
// listener sequentially, which gives in-order delivery per wallet
// manager and keeps listener code out of engine locks. Event records
// hold weak references so observability never extends a lifetime.

use crate::{
    manager::WalletManager,
    network::Network,
    system::System,
    transfer::{Transfer, TransferState},
    wallet::Wallet,
};
use log::trace;
use polywallet_common::{
    amount::Amount,
    chain::SyncDepth,
    error::Status,
    fee_basis::FeeBasis,
};
use std::sync::{Arc, Mutex, Weak};
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    Unknown,
    Posix { errno: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStoppedReason {
    Complete,
    Requested,
    Unknown,
    Posix { errno: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Created,
    Connected,
    Syncing,
    Disconnected { reason: DisconnectReason },
    Deleted,
}

impl ManagerState {
    pub fn label(&self) -> &'static str {
        match self {
            ManagerState::Created => "created",
            ManagerState::Connected => "connected",
            ManagerState::Syncing => "syncing",
            ManagerState::Disconnected { .. } => "disconnected",
            ManagerState::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    Created,
    NetworkAdded { network: String },
    ManagerAdded { manager: String },
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Created,
    FeesUpdated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    Created,
    Changed {
        old: ManagerState,
        new: ManagerState,
    },
    Deleted,
    WalletAdded {
        currency: String,
    },
    WalletDeleted {
        currency: String,
    },
    SyncStarted,
    SyncContinues {
        height: Option<u64>,
        percent: f32,
    },
    SyncStopped {
        reason: SyncStoppedReason,
    },
    SyncRecommended {
        depth: SyncDepth,
    },
    BlockHeightUpdated {
        height: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    Created,
    Changed,
    Deleted,
    TransferAdded { transfer: String },
    TransferChanged { transfer: String },
    TransferSubmitted { transfer: String },
    TransferDeleted { transfer: String },
    BalanceUpdated { amount: Amount },
    FeeBasisUpdated { fee_basis: FeeBasis },
    FeeBasisEstimated {
        cookie: u64,
        status: Status,
        fee_basis: Option<FeeBasis>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Created,
    Changed {
        old: TransferState,
        new: TransferState,
    },
    Deleted,
}

pub struct SystemEventRecord {
    pub system: Weak<System>,
    pub event: SystemEvent,
}

pub struct NetworkEventRecord {
    pub network: Weak<Network>,
    pub event: NetworkEvent,
}

pub struct ManagerEventRecord {
    pub manager: Weak<WalletManager>,
    pub event: ManagerEvent,
}

pub struct WalletEventRecord {
    pub manager: Weak<WalletManager>,
    pub wallet: Weak<Wallet>,
    pub event: WalletEvent,
}

pub struct TransferEventRecord {
    pub manager: Weak<WalletManager>,
    pub wallet: Weak<Wallet>,
    pub transfer: Weak<Transfer>,
    pub event: TransferEvent,
}

// The embedder's bundle of callbacks. Invoked sequentially from one
// dispatcher task per queue; implementations must not block for long
// and must not call back into the engine while handling an event.
pub trait Listener: Send + Sync + 'static {
    fn on_system_event(&self, _event: SystemEventRecord) {}
    fn on_network_event(&self, _event: NetworkEventRecord) {}
    fn on_manager_event(&self, _event: ManagerEventRecord) {}
    fn on_wallet_event(&self, _event: WalletEventRecord) {}
    fn on_transfer_event(&self, _event: TransferEventRecord) {}
}

// A listener that ignores everything
pub struct NullListener;

impl Listener for NullListener {}

pub(crate) enum QueuedEvent {
    System(SystemEventRecord),
    Network(NetworkEventRecord),
    Manager(ManagerEventRecord),
    Wallet(WalletEventRecord),
    Transfer(TransferEventRecord),
    Stop,
}

// One FIFO plus its dispatcher task. Dropping events whose primary
// entity is already gone happens here, at dispatch time, after the
// weak upgrade fails.
pub struct EventQueue {
    sender: mpsc::UnboundedSender<QueuedEvent>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    // Must run within a tokio runtime
    pub fn spawn(listener: Arc<dyn Listener>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                match event {
                    QueuedEvent::Stop => break,
                    QueuedEvent::System(record) => {
                        if record.system.upgrade().is_some() {
                            listener.on_system_event(record);
                        }
                    }
                    QueuedEvent::Network(record) => {
                        if record.network.upgrade().is_some() {
                            listener.on_network_event(record);
                        }
                    }
                    QueuedEvent::Manager(record) => {
                        if record.manager.upgrade().is_some() {
                            listener.on_manager_event(record);
                        }
                    }
                    QueuedEvent::Wallet(record) => {
                        if record.wallet.upgrade().is_some() {
                            listener.on_wallet_event(record);
                        }
                    }
                    QueuedEvent::Transfer(record) => {
                        if record.transfer.upgrade().is_some() {
                            listener.on_transfer_event(record);
                        }
                    }
                }
            }
        });

        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub(crate) fn publish(&self, event: QueuedEvent) {
        if self.sender.send(event).is_err() {
            trace!("event dropped after queue stop");
        }
    }

    // Drain whatever is queued, then stop the dispatcher
    pub async fn stop(&self) {
        let _ = self.sender.send(QueuedEvent::Stop);
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

// Flattened event copy kept by the recording listener
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    System(SystemEvent),
    Network(NetworkEvent),
    Manager(ManagerEvent),
    Wallet(WalletEvent),
    Transfer(TransferEvent),
}

// Collects events for assertions and diagnostics
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<RecordedEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl Listener for RecordingListener {
    fn on_system_event(&self, event: SystemEventRecord) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::System(event.event));
    }

    fn on_network_event(&self, event: NetworkEventRecord) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::Network(event.event));
    }

    fn on_manager_event(&self, event: ManagerEventRecord) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::Manager(event.event));
    }

    fn on_wallet_event(&self, event: WalletEventRecord) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::Wallet(event.event));
    }

    fn on_transfer_event(&self, event: TransferEventRecord) {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::Transfer(event.event));
    }
}
