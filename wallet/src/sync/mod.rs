// The two synchronization strategies behind one interface. The manager
// picks which implementation is active from the sync mode and never
// looks past this trait.

pub mod api;
pub mod p2p;

pub use api::QryManager;
pub use p2p::{P2pManager, PeerTransport};

use crate::error::WalletError;
use async_trait::async_trait;
use polywallet_common::{api::ClientError, hash::TxHash};

// What the peer network tells us about transactions. The P2P manager
// translates these into reconciliation calls.
#[derive(Debug, Clone)]
pub enum P2pEvent {
    TransactionAdded {
        raw: Vec<u8>,
        // Zero while the transaction waits in the mempool
        block_height: u64,
        timestamp: u64,
    },
    TransactionsUpdated {
        hashes: Vec<TxHash>,
        block_height: u64,
        timestamp: u64,
    },
    TransactionDeleted {
        hash: TxHash,
        recommend_rescan: bool,
    },
    BalanceChanged,
}

#[async_trait]
pub trait ClientSync: Send + Sync {
    // Make the data source reachable; `peer` pins a P2P transport to a
    // specific endpoint
    async fn connect(&self, peer: Option<String>) -> Result<(), WalletError>;

    // Close the data source; any running sync must be cancelled first
    async fn disconnect(&self);

    // Start a background catch-up from `start_height`. A second call
    // while one is running is a no-op.
    async fn begin_sync(&self, start_height: u64);

    // Cooperatively cancel the running catch-up, if any
    async fn cancel_sync(&self);

    // Hand signed raw bytes to the network
    async fn submit(&self, raw: Vec<u8>) -> Result<TxHash, ClientError>;

    // Hint from the embedder about host connectivity
    fn set_reachable(&self, reachable: bool);
}
