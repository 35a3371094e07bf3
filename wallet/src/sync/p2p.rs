// P2P-mode synchronization: participate in the chain's gossip through a
// transport bound at construction. The transport owns sockets and wire
// framing; this type owns peer persistence, duplicate suppression and
// the translation of peer events into reconciliation calls.

use super::{ClientSync, P2pEvent};
use crate::{
    config::{ERRNO_CONNECTION_REFUSED, ERRNO_NOT_CONNECTED, P2P_SEEN_CACHE_SIZE},
    error::WalletError,
    events::{DisconnectReason, SyncStoppedReason},
    manager::WalletManager,
    storage::StoredPeer,
};
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use lru::LruCache;
use polywallet_common::{api::ClientError, hash::TxHash, serializer::Serializer};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, Weak,
    },
};
use tokio::{sync::mpsc, sync::Mutex, task::JoinHandle};

// The pluggable gossip transport. Implementations speak the chain's
// actual wire protocol; the engine only consumes this surface.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn connect(&self, peer: Option<String>) -> Result<(), ClientError>;

    async fn disconnect(&self);

    async fn block_height(&self) -> Result<u64, ClientError>;

    // Stream chain activity from `start_height` until caught up, then
    // return. The sender is dropped on return, which ends the consumer
    // loop.
    async fn sync_from(
        &self,
        start_height: u64,
        events: mpsc::UnboundedSender<P2pEvent>,
    ) -> Result<(), ClientError>;

    async fn submit(&self, raw: &[u8]) -> Result<TxHash, ClientError>;

    // Peers worth remembering across runs
    async fn known_peers(&self) -> Vec<StoredPeer>;
}

pub struct P2pManager {
    manager: Weak<WalletManager>,
    transport: Arc<dyn PeerTransport>,
    task: Mutex<Option<JoinHandle<()>>>,
    seen: StdMutex<LruCache<TxHash, ()>>,
    reachable: AtomicBool,
}

impl P2pManager {
    pub(crate) fn new(
        manager: Weak<WalletManager>,
        transport: Arc<dyn PeerTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            transport,
            task: Mutex::new(None),
            seen: StdMutex::new(LruCache::new(
                NonZeroUsize::new(P2P_SEEN_CACHE_SIZE).unwrap(),
            )),
            reachable: AtomicBool::new(true),
        })
    }

    fn reasons(error: &ClientError) -> (SyncStoppedReason, DisconnectReason) {
        match error {
            ClientError::LostConnectivity => (
                SyncStoppedReason::Posix {
                    errno: ERRNO_NOT_CONNECTED,
                },
                DisconnectReason::Posix {
                    errno: ERRNO_NOT_CONNECTED,
                },
            ),
            ClientError::Unavailable => (
                SyncStoppedReason::Posix {
                    errno: ERRNO_CONNECTION_REFUSED,
                },
                DisconnectReason::Posix {
                    errno: ERRNO_CONNECTION_REFUSED,
                },
            ),
            _ => (SyncStoppedReason::Unknown, DisconnectReason::Unknown),
        }
    }

    // A freshly announced transaction is interesting once
    fn first_sighting(&self, event: &P2pEvent) -> bool {
        let P2pEvent::TransactionAdded { raw, .. } = event else {
            return true;
        };
        let Ok(tx) = crate::handlers::codec::ParsedTransaction::from_bytes(raw) else {
            // Malformed peer data is dropped downstream with a log line
            return true;
        };
        let hash = tx.hash();
        let mut seen = self.seen.lock().unwrap();
        if seen.contains(&hash) {
            trace!("duplicate announcement for {}", hash);
            false
        } else {
            seen.put(hash, ());
            true
        }
    }

    async fn run(self: Arc<Self>, start_height: u64) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        if !manager.sync_started() {
            return;
        }

        match self.transport.block_height().await {
            Ok(height) => manager.announce_block_number(height, None).await,
            Err(error) => {
                warn!("peer height query failed: {}", error);
                let (stop, disconnect) = Self::reasons(&error);
                manager.sync_stopped(stop);
                manager.disconnect_with_reason(disconnect);
                return;
            }
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transport = Arc::clone(&self.transport);
        let feeder: JoinHandle<Result<(), ClientError>> =
            tokio::spawn(async move { transport.sync_from(start_height, events_tx).await });

        let target = manager.network().height();
        while let Some(event) = events_rx.recv().await {
            if !self.first_sighting(&event) {
                continue;
            }
            manager.apply_p2p_event(event).await;

            let current = manager.last_synced_height();
            if target > start_height {
                let percent = (current.saturating_sub(start_height) as f32
                    / (target - start_height) as f32)
                    * 100.0;
                manager.sync_progress(Some(current), percent.min(100.0));
            }
        }

        match feeder.await {
            Ok(Ok(())) => {
                manager.record_synced_height(manager.network().height());
                self.persist_peers(&manager).await;
                manager.sync_stopped(SyncStoppedReason::Complete);
            }
            Ok(Err(error)) => {
                warn!("p2p sync failed: {}", error);
                let (stop, disconnect) = Self::reasons(&error);
                manager.sync_stopped(stop);
                manager.disconnect_with_reason(disconnect);
            }
            Err(join_error) => {
                debug!("p2p feeder ended: {}", join_error);
                manager.sync_stopped(SyncStoppedReason::Unknown);
            }
        }
    }

    async fn persist_peers(&self, manager: &Arc<WalletManager>) {
        let peers = self.transport.known_peers().await;
        if peers.is_empty() {
            return;
        }
        match manager.file_service().replace(&peers) {
            Ok(()) => info!("persisted {} peers", peers.len()),
            Err(error) => warn!("failed to persist peers: {}", error),
        }
    }
}

#[async_trait]
impl ClientSync for P2pManager {
    async fn connect(&self, peer: Option<String>) -> Result<(), WalletError> {
        if let Some(manager) = self.manager.upgrade() {
            // Remembered peers help the transport bootstrap
            match manager.file_service().load::<StoredPeer>() {
                Ok(peers) if !peers.is_empty() => {
                    debug!("loaded {} remembered peers", peers.len())
                }
                Ok(_) => {}
                Err(error) => warn!("failed to load peers: {}", error),
            }
        }

        self.transport.connect(peer).await?;
        Ok(())
    }

    async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    async fn begin_sync(&self, start_height: u64) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                trace!("p2p sync already running");
                return;
            }
        }

        let Some(this) = self.manager.upgrade().and_then(|manager| manager.p2p()) else {
            return;
        };
        *task = Some(tokio::spawn(this.run(start_height)));
    }

    // Cancellation closes the consumer; the transport is told to close
    // its sockets via disconnect
    async fn cancel_sync(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            if !handle.is_finished() {
                handle.abort();
            }
            let _ = handle.await;
        }
    }

    async fn submit(&self, raw: Vec<u8>) -> Result<TxHash, ClientError> {
        if !self.reachable.load(Ordering::Relaxed) {
            return Err(ClientError::LostConnectivity);
        }
        self.transport.submit(&raw).await
    }

    fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }
}
