use async_trait::async_trait;
use presale_core::ExternalTxId;

use crate::error::GatewayError;
use crate::types::{CreateTransaction, GatewayStatus, GatewayTransaction};

/// Payment processor interface.
///
/// Each implementation bridges the engine to one processor (a hosted crypto
/// payment service, an in-process sandbox, etc.). Implementations hold no
/// payment state the engine relies on; the ledger is the source of truth.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a deposit transaction and obtain its address and URLs.
    async fn create_transaction(
        &self,
        request: &CreateTransaction,
    ) -> Result<GatewayTransaction, GatewayError>;

    /// Query the current status of a transaction. Used by reconciliation
    /// when push notifications were missed.
    async fn get_transaction_status(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<GatewayStatus, GatewayError>;

    /// Authenticate an inbound notification. `false` means the caller must
    /// discard the payload without reading any field.
    fn verify_callback_signature(&self, raw_payload: &[u8], supplied_signature: &str) -> bool;

    /// Return the unique identifier of this gateway (e.g. "gw-coinpayments").
    fn gateway_id(&self) -> &str;
}
