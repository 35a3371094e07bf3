// Types crossing the embedder-client boundary. These are serde types:
// the remote index speaks JSON and the engine never persists them as-is.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// Canonical state the index assigns to an on-chain event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Confirmed,
    Submitted,
    Failed,
}

// A raw transaction as known to the remote index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionBundle {
    pub identifier: String,
    #[serde(with = "hex")]
    pub raw: Vec<u8>,
    pub status: BundleStatus,
    pub block_height: u64,
    pub timestamp: u64,
}

// A per-wallet credit or debit record as known to the remote index.
// Amounts are decimal strings in the currency's base unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferBundle {
    pub identifier: String,
    pub hash: String,
    // Distinguishes multiple transfers within one transaction
    #[serde(default)]
    pub index: Option<u32>,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub fee: Option<String>,
    pub block_number: u64,
    pub transaction_index: u64,
    pub block_timestamp: u64,
    pub status: BundleStatus,
    #[serde(default)]
    pub include_error: Option<String>,
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
}

impl TransferBundle {
    // Sort key for deterministic reconciliation order
    pub fn ordering_key(&self) -> (u64, u64, &str) {
        (self.block_number, self.transaction_index, &self.identifier)
    }
}

// Answer to a block number query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockNumberBundle {
    pub height: u64,
    #[serde(default)]
    pub verified_hash: Option<String>,
}

// Answer to a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBundle {
    pub identifier: String,
    pub hash: String,
}

// Answer to a fee estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEstimateBundle {
    pub cost_units: u64,
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
}

// Why a submission was rejected, as far as the network told us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitErrorKind {
    Unknown,
    InsufficientNetworkFee,
    InvalidTransaction,
    Duplicate,
}

impl fmt::Display for SubmitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitErrorKind::Unknown => write!(f, "unknown"),
            SubmitErrorKind::InsufficientNetworkFee => write!(f, "insufficient network fee"),
            SubmitErrorKind::InvalidTransaction => write!(f, "invalid transaction"),
            SubmitErrorKind::Duplicate => write!(f, "duplicate"),
        }
    }
}

// Closed client failure taxonomy. Everything the embedder's transport
// can go wrong with maps onto one of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("resource unavailable: {0}")]
    Resource(String),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("submission failed ({kind}): {detail}")]
    Submission {
        kind: SubmitErrorKind,
        detail: String,
    },
    #[error("service unavailable")]
    Unavailable,
    #[error("lost connectivity")]
    LostConnectivity,
}

impl ClientError {
    // True when retrying later could succeed without changing the request
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Unavailable | ClientError::LostConnectivity)
    }
}
