use crate::{error::WalletError, handlers::codec::ParsedTransaction, wallet::Wallet};
use indexmap::IndexMap;
use polywallet_common::{
    address::Address, amount::Amount, fee_basis::FeeBasis, hash::TxHash, utils::truncate_detail,
};
use std::sync::{Arc, Mutex, Weak};

// A transfer from the owning wallet's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Sent,
    Received,
    Recovered,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::Sent => write!(f, "sent"),
            TransferDirection::Received => write!(f, "received"),
            TransferDirection::Recovered => write!(f, "recovered"),
        }
    }
}

// Success or failure of an included transfer, distinct from acceptance
// by the chain itself
#[derive(Debug, Clone, PartialEq)]
pub enum IncludeStatus {
    Success,
    InsufficientNetworkCostUnit { detail: String },
    Reverted { detail: String },
    Unknown { detail: String },
}

impl IncludeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, IncludeStatus::Success)
    }

    // Classify the free-form error the index reports for an included
    // transaction; absent error means it executed
    pub fn from_error_detail(detail: Option<&str>) -> Self {
        match detail {
            None => IncludeStatus::Success,
            Some(d) => {
                let clamped = truncate_detail(d);
                let lower = d.to_ascii_lowercase();
                if lower.contains("revert") {
                    IncludeStatus::Reverted { detail: clamped }
                } else if lower.contains("gas") || lower.contains("cost") {
                    IncludeStatus::InsufficientNetworkCostUnit { detail: clamped }
                } else {
                    IncludeStatus::Unknown { detail: clamped }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitError {
    Unknown { detail: String },
    Posix { errno: i32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferState {
    Created,
    Signed,
    Submitted,
    Included {
        block_number: u64,
        block_timestamp: u64,
        transaction_index: u64,
        fee_basis: Option<FeeBasis>,
        status: IncludeStatus,
    },
    Errored {
        error: SubmitError,
    },
    Deleted,
}

impl TransferState {
    pub fn label(&self) -> &'static str {
        match self {
            TransferState::Created => "created",
            TransferState::Signed => "signed",
            TransferState::Submitted => "submitted",
            TransferState::Included { .. } => "included",
            TransferState::Errored { .. } => "errored",
            TransferState::Deleted => "deleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Errored { .. } | TransferState::Deleted)
    }

    pub fn is_included(&self) -> bool {
        matches!(self, TransferState::Included { .. })
    }

    // The legal-transitions table. Same-variant moves are updates
    // (a deeper confirmation, a refreshed fee basis) and always legal;
    // Included -> Submitted is the re-org path.
    pub fn can_transition(&self, next: &TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (a, b) if a.label() == b.label() => !matches!(a, Deleted),
            (Created, Signed) => true,
            (Signed, Submitted) => true,
            (Submitted, Included { .. }) => true,
            // A failure between signing and network acceptance also
            // lands in Errored
            (Signed | Submitted, Errored { .. }) => true,
            (Included { .. }, Submitted) => true,
            (Created | Signed | Submitted | Included { .. }, Deleted) => true,
            _ => false,
        }
    }
}

struct TransferInner {
    state: TransferState,
    hash: Option<TxHash>,
    // The unsigned/signed transaction for transfers this wallet created;
    // reconciled inbound transfers never carry one
    staged: Option<ParsedTransaction>,
}

// A single value movement within one wallet. Identity never changes
// after construction; state, hash (once) and the staged transaction are
// the only mutable parts.
pub struct Transfer {
    wallet: Weak<Wallet>,
    uids: String,
    source: Address,
    target: Address,
    amount: Amount,
    direction: TransferDirection,
    estimated_fee_basis: FeeBasis,
    attributes: IndexMap<String, String>,
    inner: Mutex<TransferInner>,
}

impl Transfer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        wallet: &Arc<Wallet>,
        uids: String,
        source: Address,
        target: Address,
        amount: Amount,
        direction: TransferDirection,
        estimated_fee_basis: FeeBasis,
        attributes: IndexMap<String, String>,
        hash: Option<TxHash>,
        state: TransferState,
    ) -> Arc<Self> {
        Arc::new(Self {
            wallet: Arc::downgrade(wallet),
            uids,
            source,
            target,
            amount,
            direction,
            estimated_fee_basis,
            attributes,
            inner: Mutex::new(TransferInner {
                state,
                hash,
                staged: None,
            }),
        })
    }

    pub fn uids(&self) -> &str {
        &self.uids
    }

    pub fn wallet(&self) -> Option<Arc<Wallet>> {
        self.wallet.upgrade()
    }

    pub fn source(&self) -> &Address {
        &self.source
    }

    pub fn target(&self) -> &Address {
        &self.target
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    pub fn estimated_fee_basis(&self) -> &FeeBasis {
        &self.estimated_fee_basis
    }

    pub fn state(&self) -> TransferState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn hash(&self) -> Option<TxHash> {
        self.inner.lock().unwrap().hash.clone()
    }

    // The confirmed fee basis, present once included
    pub fn confirmed_fee_basis(&self) -> Option<FeeBasis> {
        match &self.inner.lock().unwrap().state {
            TransferState::Included { fee_basis, .. } => fee_basis.clone(),
            _ => None,
        }
    }

    // Confirmed fee when known, the estimate otherwise
    pub fn fee(&self) -> Amount {
        self.confirmed_fee_basis()
            .map(|basis| basis.fee().clone())
            .unwrap_or_else(|| self.estimated_fee_basis.fee().clone())
    }

    // Apply a state change through the legal-transitions table.
    // Ok(None) means the new state equals the old one and nothing
    // observable happened.
    pub fn set_state(
        &self,
        next: TransferState,
    ) -> Result<Option<(TransferState, TransferState)>, WalletError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == next {
            return Ok(None);
        }
        if !inner.state.can_transition(&next) {
            return Err(WalletError::IllegalStateTransition {
                from: inner.state.label(),
                to: next.label(),
            });
        }
        let old = std::mem::replace(&mut inner.state, next.clone());
        Ok(Some((old, next)))
    }

    // The hash is settable exactly once. Re-assigning the same hash is
    // a no-op (Ok(false)); a different hash is a hard error.
    pub fn assign_hash(&self, hash: TxHash) -> Result<bool, WalletError> {
        let mut inner = self.inner.lock().unwrap();
        match &inner.hash {
            Some(existing) if *existing == hash => Ok(false),
            Some(_) => Err(WalletError::TransferHashMismatch),
            None => {
                inner.hash = Some(hash);
                Ok(true)
            }
        }
    }

    pub(crate) fn stage(&self, tx: ParsedTransaction) {
        self.inner.lock().unwrap().staged = Some(tx);
    }

    pub(crate) fn staged(&self) -> Option<ParsedTransaction> {
        self.inner.lock().unwrap().staged.clone()
    }

    pub(crate) fn replace_staged(&self, tx: ParsedTransaction) {
        self.inner.lock().unwrap().staged = Some(tx);
    }

    // Does this transfer count toward the wallet balance
    pub fn contributes(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        match &inner.state {
            TransferState::Errored { .. } | TransferState::Deleted => false,
            TransferState::Included { status, .. } => status.is_success(),
            _ => true,
        }
    }

    // Signed contribution in base units: direction * amount minus the
    // fee attributable to this wallet's user
    pub fn balance_contribution(&self) -> Amount {
        if !self.contributes() {
            return Amount::zero(self.amount.unit());
        }

        match self.direction {
            TransferDirection::Received => self.amount.clone(),
            TransferDirection::Sent => self
                .amount
                .checked_add(&self.fee())
                .unwrap_or_else(|| self.amount.clone())
                .negated(),
            TransferDirection::Recovered => self.fee().negated(),
        }
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Transfer")
            .field("uids", &self.uids)
            .field("direction", &self.direction)
            .field("state", &inner.state.label())
            .field("hash", &inner.hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn included(block: u64) -> TransferState {
        TransferState::Included {
            block_number: block,
            block_timestamp: 0,
            transaction_index: 0,
            fee_basis: None,
            status: IncludeStatus::Success,
        }
    }

    #[test]
    fn test_transition_table() {
        let created = TransferState::Created;
        assert!(created.can_transition(&TransferState::Signed));
        assert!(!created.can_transition(&TransferState::Submitted));
        assert!(TransferState::Signed.can_transition(&TransferState::Submitted));
        assert!(TransferState::Submitted.can_transition(&included(10)));
        assert!(TransferState::Submitted.can_transition(&TransferState::Errored {
            error: SubmitError::Unknown { detail: "".into() },
        }));
        // Submission failures strike after signing
        assert!(TransferState::Signed.can_transition(&TransferState::Errored {
            error: SubmitError::Unknown { detail: "".into() },
        }));
        assert!(!TransferState::Created.can_transition(&TransferState::Errored {
            error: SubmitError::Unknown { detail: "".into() },
        }));
        // Re-org path
        assert!(included(10).can_transition(&TransferState::Submitted));
        // Same-variant update with different payload
        assert!(included(10).can_transition(&included(11)));
        // Terminal states
        assert!(!TransferState::Deleted.can_transition(&TransferState::Created));
        assert!(!TransferState::Errored {
            error: SubmitError::Unknown { detail: "".into() },
        }
        .can_transition(&included(10)));
        // Any non-terminal to deleted
        assert!(created.can_transition(&TransferState::Deleted));
        assert!(included(10).can_transition(&TransferState::Deleted));
    }

    #[test]
    fn test_include_status_classification() {
        assert!(IncludeStatus::from_error_detail(None).is_success());
        assert!(matches!(
            IncludeStatus::from_error_detail(Some("execution reverted")),
            IncludeStatus::Reverted { .. }
        ));
        assert!(matches!(
            IncludeStatus::from_error_detail(Some("out of gas")),
            IncludeStatus::InsufficientNetworkCostUnit { .. }
        ));
        let long = "some very long failure detail that exceeds the limit";
        match IncludeStatus::from_error_detail(Some(long)) {
            IncludeStatus::Unknown { detail } => assert!(detail.len() <= 31),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
