// API-mode synchronization: drive the embedder's client against the
// remote index. One catch-up pass per sync, then height polling until
// cancelled. The manager owns state transitions; this type only reports
// what happened.

use super::ClientSync;
use crate::{
    client::Client,
    config::{ERRNO_CONNECTION_REFUSED, ERRNO_NOT_CONNECTED},
    error::WalletError,
    events::{DisconnectReason, SyncStoppedReason},
    manager::WalletManager,
};
use async_trait::async_trait;
use log::{debug, trace, warn};
use polywallet_common::{
    api::ClientError,
    config::{API_POLL_INTERVAL_SECS, API_SYNC_WINDOW_BLOCKS},
    hash::TxHash,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};

pub struct QryManager {
    manager: Weak<WalletManager>,
    client: Arc<dyn Client>,
    task: Mutex<Option<JoinHandle<()>>>,
    reachable: AtomicBool,
    connected: AtomicBool,
}

impl QryManager {
    pub(crate) fn new(manager: Weak<WalletManager>, client: Arc<dyn Client>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            client,
            task: Mutex::new(None),
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
        })
    }

    // Map a client failure onto the sync/disconnect reason taxonomy
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

    // One full catch-up: height, then windowed scans over every watched
    // address. Lock discipline: address snapshots and reconciliation
    // each take their locks inside the manager; nothing is held across
    // the client awaits here.
    async fn sync_pass(
        &self,
        manager: &Arc<WalletManager>,
        start_height: u64,
    ) -> Result<(), ClientError> {
        let network = manager.network().uids().to_string();

        let head = self.client.get_block_number(&network).await?;
        manager
            .announce_block_number(head.height, head.verified_hash.clone())
            .await;

        let begin = start_height.min(head.height);
        let mut window_start = begin;
        loop {
            let window_end = (window_start + API_SYNC_WINDOW_BLOCKS).min(head.height);
            let addresses = manager.scan_addresses().await;

            let transactions = self
                .client
                .get_transactions(&network, &addresses, window_start, window_end)
                .await?;
            let transfers = self
                .client
                .get_transfers(&network, &addresses, window_start, window_end)
                .await?;

            if !transactions.is_empty() {
                manager.ingest_transaction_bundles(transactions).await;
            }
            if !transfers.is_empty() {
                manager.ingest_transfer_bundles(transfers).await;
            }

            let span = head.height.saturating_sub(begin).max(1);
            let percent = (window_end.saturating_sub(begin) as f32 / span as f32) * 100.0;
            manager.sync_progress(Some(window_end), percent.min(100.0));

            if window_end >= head.height {
                break;
            }
            window_start = window_end + 1;
        }

        manager.record_synced_height(head.height);
        Ok(())
    }

    async fn run(self: Arc<Self>, start_height: u64) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };

        if !manager.sync_started() {
            // Manager is no longer in a state that wants this sync
            return;
        }

        match self.sync_pass(&manager, start_height).await {
            Ok(()) => {
                manager.sync_stopped(SyncStoppedReason::Complete);
            }
            Err(error) => {
                warn!("api sync failed: {}", error);
                let (stop, disconnect) = Self::reasons(&error);
                manager.sync_stopped(stop);
                manager.disconnect_with_reason(disconnect);
                return;
            }
        }

        // Stay connected and poll for new blocks; each new head runs a
        // fresh (evented) catch-up from the last completed height
        loop {
            sleep(Duration::from_secs(API_POLL_INTERVAL_SECS)).await;
            if !self.reachable.load(Ordering::Relaxed) {
                continue;
            }
            let Some(manager) = self.manager.upgrade() else {
                return;
            };

            let network = manager.network().uids().to_string();
            match self.client.get_block_number(&network).await {
                Ok(head) if head.height > manager.network().height() => {
                    if !manager.sync_started() {
                        continue;
                    }
                    let from = manager.last_synced_height();
                    match self.sync_pass(&manager, from).await {
                        Ok(()) => {
                            manager.sync_stopped(SyncStoppedReason::Complete);
                        }
                        Err(error) => {
                            warn!("api poll sync failed: {}", error);
                            let (stop, disconnect) = Self::reasons(&error);
                            manager.sync_stopped(stop);
                            manager.disconnect_with_reason(disconnect);
                            return;
                        }
                    }
                }
                Ok(_) => trace!("no new blocks"),
                Err(error) => debug!("height poll failed: {}", error),
            }
        }
    }
}

#[async_trait]
impl ClientSync for QryManager {
    async fn connect(&self, _peer: Option<String>) -> Result<(), WalletError> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    async fn begin_sync(&self, start_height: u64) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                trace!("api sync already running");
                return;
            }
        }

        let this = match self.manager.upgrade() {
            Some(manager) => manager.qry(),
            None => return,
        };
        *task = Some(tokio::spawn(this.run(start_height)));
    }

    // In-flight client answers are dropped on arrival: aborting the
    // task means nobody is left to receive them
    async fn cancel_sync(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            if !handle.is_finished() {
                handle.abort();
            }
            let _ = handle.await;
        }
    }

    async fn submit(&self, raw: Vec<u8>) -> Result<TxHash, ClientError> {
        let manager = self
            .manager
            .upgrade()
            .ok_or(ClientError::LostConnectivity)?;
        let network = manager.network();

        let bundle = self
            .client
            .submit_transaction(network.uids(), None, &raw)
            .await?;
        TxHash::from_hex(network.chain(), &bundle.hash)
            .map_err(|_| ClientError::BadResponse(format!("bad hash {}", bundle.hash)))
    }

    fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }
}
