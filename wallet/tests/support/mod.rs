// Shared fixtures for the end-to-end tests: a scriptable client, a
// simulated peer transport and small wait helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use polywallet_common::{
    account::Account,
    api::{
        BlockNumberBundle, ClientError, FeeEstimateBundle, SubmitBundle, TransactionBundle,
        TransferBundle,
    },
    chain::ChainType,
    hash::{digest, TxHash},
    keys::Secret,
};
use polywallet_wallet::{
    client::Client,
    handlers::codec::ParsedTransaction,
    storage::StoredPeer,
    sync::{P2pEvent, PeerTransport},
};
use polywallet_common::serializer::Serializer;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::mpsc;

// Route engine logs to stderr while debugging a test
pub fn init_logger() {
    let _ = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .chain(std::io::stderr())
        .apply();
}

pub fn seed() -> Secret {
    let mut bytes = [0u8; 64];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (i * 3 + 1) as u8;
    }
    Secret::new(bytes)
}

pub fn account() -> Arc<Account> {
    // A creation time that predates every testnet checkpoint, so
    // from-creation syncs start at block zero
    Account::from_seed(&seed(), 1_300_000_000, "test-account")
}

// A client whose answers the test scripts up front and can extend
// between syncs
#[derive(Default)]
pub struct MockClient {
    pub height: AtomicU64,
    pub transactions: Mutex<Vec<TransactionBundle>>,
    pub transfers: Mutex<Vec<TransferBundle>>,
    pub fail_submission: AtomicBool,
    pub submissions: Mutex<Vec<Vec<u8>>>,
}

impl MockClient {
    pub fn new(height: u64) -> Arc<Self> {
        let client = Self::default();
        client.height.store(height, Ordering::Relaxed);
        Arc::new(client)
    }

    pub fn push_transaction(&self, bundle: TransactionBundle) {
        self.transactions.lock().unwrap().push(bundle);
    }

    pub fn push_transfer(&self, bundle: TransferBundle) {
        self.transfers.lock().unwrap().push(bundle);
    }
}

#[async_trait]
impl Client for MockClient {
    async fn get_block_number(&self, _network: &str) -> Result<BlockNumberBundle, ClientError> {
        Ok(BlockNumberBundle {
            height: self.height.load(Ordering::Relaxed),
            verified_hash: None,
        })
    }

    async fn get_transactions(
        &self,
        _network: &str,
        _addresses: &[String],
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<TransactionBundle>, ClientError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|b| {
                b.block_height == 0 || (b.block_height >= begin_block && b.block_height <= end_block)
            })
            .cloned()
            .collect())
    }

    async fn get_transfers(
        &self,
        _network: &str,
        _addresses: &[String],
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<TransferBundle>, ClientError> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .filter(|b| {
                b.block_number == 0 || (b.block_number >= begin_block && b.block_number <= end_block)
            })
            .cloned()
            .collect())
    }

    async fn submit_transaction(
        &self,
        _network: &str,
        identifier: Option<&str>,
        raw: &[u8],
    ) -> Result<SubmitBundle, ClientError> {
        if self.fail_submission.load(Ordering::Relaxed) {
            return Err(ClientError::Submission {
                kind: polywallet_common::api::SubmitErrorKind::InvalidTransaction,
                detail: "rejected by test".into(),
            });
        }
        self.submissions.lock().unwrap().push(raw.to_vec());
        // Answer with the canonical transaction identity, the way a
        // real index would
        let hash = ParsedTransaction::from_bytes(raw)
            .map(|tx| tx.hash().to_hex())
            .unwrap_or_else(|_| hex::encode(digest(raw)));
        Ok(SubmitBundle {
            identifier: identifier.unwrap_or("submitted").to_string(),
            hash,
        })
    }

    async fn estimate_transaction_fee(
        &self,
        _network: &str,
        _raw: &[u8],
        _hash_hex: &str,
    ) -> Result<FeeEstimateBundle, ClientError> {
        Ok(FeeEstimateBundle {
            cost_units: 250,
            attributes: Default::default(),
        })
    }
}

// A peer transport that replays a scripted event stream
pub struct SimTransport {
    pub chain: ChainType,
    pub height: u64,
    pub events: Mutex<Vec<P2pEvent>>,
    pub peers: Vec<StoredPeer>,
}

impl SimTransport {
    pub fn new(chain: ChainType, height: u64, events: Vec<P2pEvent>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            height,
            events: Mutex::new(events),
            peers: vec![StoredPeer {
                address: [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 10, 0, 0, 1],
                port: 18_333,
                services: 1,
                timestamp: 1_600_000_000,
                flags: 0,
            }],
        })
    }
}

#[async_trait]
impl PeerTransport for SimTransport {
    async fn connect(&self, _peer: Option<String>) -> Result<(), ClientError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn block_height(&self) -> Result<u64, ClientError> {
        Ok(self.height)
    }

    async fn sync_from(
        &self,
        _start_height: u64,
        events: mpsc::UnboundedSender<P2pEvent>,
    ) -> Result<(), ClientError> {
        for event in self.events.lock().unwrap().drain(..) {
            let _ = events.send(event);
        }
        Ok(())
    }

    async fn submit(&self, raw: &[u8]) -> Result<TxHash, ClientError> {
        Ok(ParsedTransaction::from_bytes(raw)
            .map(|tx| tx.hash())
            .unwrap_or_else(|_| TxHash::new(self.chain, digest(raw))))
    }

    async fn known_peers(&self) -> Vec<StoredPeer> {
        self.peers.clone()
    }
}

// Poll until `condition` holds or the timeout elapses
pub async fn wait_for<F: FnMut() -> bool>(mut condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// Poll until the wallet balance reaches `expected` base units
pub async fn wait_for_balance(wallet: &Arc<polywallet_wallet::wallet::Wallet>, expected: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let balance = wallet.balance().await;
        if balance.to_u64_base() == Some(expected) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "timed out waiting for balance {}, still at {}",
                expected, balance
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// Give queued events time to drain
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}
