use strum::Display;

// Synchronous status codes surfaced by engine entry points.
// This is a closed set: embedders match on it exhaustively.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failed,
    UnknownNode,
    UnknownTransfer,
    UnknownAccount,
    UnknownWallet,
    UnknownBlock,
    UnknownListener,
    NodeNotConnected,
    TransferHashMismatch,
    TransferSubmission,
    NumericParse,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}
