use presale_core::{ExternalTxId, PaymentStatus};
use rust_decimal::Decimal;

/// Ledger store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lock contention or a write conflict; the whole unit may be retried.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("a payment for external transaction {0} already exists")]
    DuplicateExternalId(ExternalTxId),

    #[error("referral code {0} is already taken")]
    DuplicateReferralCode(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A monotonic update reported less than was already recorded.
    #[error("received amount for {external_tx_id} regressed from {stored} to {reported}")]
    ReceivedAmountRegressed {
        external_tx_id: ExternalTxId,
        stored: Decimal,
        reported: Decimal,
    },

    #[error("payment {external_tx_id} is already {status}")]
    TerminalPayment {
        external_tx_id: ExternalTxId,
        status: PaymentStatus,
    },

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        match e.kind() {
            rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TimedOut | rocksdb::ErrorKind::TryAgain => {
                Self::Conflict(e.into_string())
            }
            _ => Self::Backend(e.into_string()),
        }
    }
}
