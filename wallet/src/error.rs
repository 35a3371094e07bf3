use crate::storage::StorageError;
use polywallet_common::{api::ClientError, chain::ChainType, error::Status, serializer::ReaderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    #[error("unknown currency {0}")]
    UnknownCurrency(String),
    #[error("unknown transfer")]
    UnknownTransfer,
    #[error("account material is not valid for {0}")]
    InvalidAccountMaterial(ChainType),
    #[error("manager is not connected")]
    NotConnected,
    #[error("manager was deleted")]
    Deleted,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("transfer hash mismatch")]
    TransferHashMismatch,
    #[error("illegal transfer state transition from {from} to {to}")]
    IllegalStateTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("operation not supported on {0}")]
    UnsupportedChainOperation(ChainType),
    #[error("invalid transfer attribute {0}")]
    InvalidAttribute(String),
    #[error("numeric parse failure: {0}")]
    NumericParse(String),
    #[error("sync is already running")]
    SyncAlreadyRunning,
    #[error("no peer transport bound")]
    NoPeerTransport,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl WalletError {
    // Collapse onto the closed status-code set surfaced to embedders
    pub fn status(&self) -> Status {
        match self {
            WalletError::InvalidAccountMaterial(_) => Status::UnknownAccount,
            WalletError::UnknownCurrency(_) => Status::UnknownWallet,
            WalletError::UnknownTransfer => Status::UnknownTransfer,
            WalletError::NotConnected => Status::NodeNotConnected,
            WalletError::TransferHashMismatch => Status::TransferHashMismatch,
            WalletError::NumericParse(_) => Status::NumericParse,
            WalletError::Client(ClientError::Submission { .. }) => Status::TransferSubmission,
            _ => Status::Failed,
        }
    }
}
