// The embedder-supplied client for API-mode synchronization. The remote
// index's HTTP protocol is entirely the embedder's business; the engine
// only sees these five calls. Each call is the async equivalent of the
// announce-style completion callbacks: the returned future resolves with
// the announcement.

use async_trait::async_trait;
use polywallet_common::api::{
    BlockNumberBundle, ClientError, FeeEstimateBundle, SubmitBundle, TransactionBundle,
    TransferBundle,
};

#[async_trait]
pub trait Client: Send + Sync + 'static {
    // Current chain height, plus a verified block hash when the index
    // can vouch for one
    async fn get_block_number(&self, network: &str) -> Result<BlockNumberBundle, ClientError>;

    // Raw transactions touching `addresses` within the block range
    async fn get_transactions(
        &self,
        network: &str,
        addresses: &[String],
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<TransactionBundle>, ClientError>;

    // Per-wallet credit/debit records touching `addresses` within the
    // block range
    async fn get_transfers(
        &self,
        network: &str,
        addresses: &[String],
        begin_block: u64,
        end_block: u64,
    ) -> Result<Vec<TransferBundle>, ClientError>;

    // Hand raw bytes to the network through the index
    async fn submit_transaction(
        &self,
        network: &str,
        identifier: Option<&str>,
        raw: &[u8],
    ) -> Result<SubmitBundle, ClientError>;

    // Ask the index what a transaction would cost
    async fn estimate_transaction_fee(
        &self,
        network: &str,
        raw: &[u8],
        hash_hex: &str,
    ) -> Result<FeeEstimateBundle, ClientError>;
}
