use presale_core::{CoreError, ExternalTxId, PaymentStatus, UserId};
use presale_gateway::GatewayError;
use presale_ledger::StoreError;

/// Settlement-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("gateway rejected request: {0}")]
    GatewayRejected(String),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(ExternalTxId),

    #[error("callback signature invalid")]
    SignatureInvalid,

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Lock contention outlasted every retry.
    #[error("settlement of {external_tx_id} conflicted {attempts} times")]
    SettlementConflict {
        external_tx_id: ExternalTxId,
        attempts: u32,
    },

    #[error("invalid payment status transition from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    #[error("ledger error: {0}")]
    Store(#[from] StoreError),
}

impl SettlementError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GatewayUnavailable(_) | Self::SettlementConflict { .. } => true,
            Self::Store(e) => e.is_conflict(),
            _ => false,
        }
    }
}

impl From<CoreError> for SettlementError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidArgument(msg) | CoreError::InvalidStatus(msg) => {
                Self::InvalidArgument(msg)
            }
            CoreError::ConfigurationError(msg) => Self::ConfigurationError(msg),
            CoreError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
        }
    }
}

impl From<GatewayError> for SettlementError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(msg) | GatewayError::InvalidResponse(msg) => {
                Self::GatewayUnavailable(msg)
            }
            GatewayError::Rejected(msg) => Self::GatewayRejected(msg),
            GatewayError::MalformedCallback(msg) | GatewayError::Encoding(msg) => {
                Self::InvalidArgument(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(SettlementError::GatewayUnavailable("down".into()).is_retryable());
        assert!(SettlementError::Store(StoreError::Conflict("busy".into())).is_retryable());
        assert!(!SettlementError::SignatureInvalid.is_retryable());
        assert!(!SettlementError::Store(StoreError::Backend("io".into())).is_retryable());
    }

    #[test]
    fn test_gateway_error_mapping() {
        let e: SettlementError = GatewayError::InvalidResponse("garbled".into()).into();
        assert!(matches!(e, SettlementError::GatewayUnavailable(_)));
        let e: SettlementError = GatewayError::Rejected("bad currency".into()).into();
        assert!(matches!(e, SettlementError::GatewayRejected(_)));
    }
}
