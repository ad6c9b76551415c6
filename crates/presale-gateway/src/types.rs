use presale_core::{ExternalTxId, GatewayArtifacts, PaymentStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Parameters for opening a deposit transaction with the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransaction {
    /// Amount in the quote currency.
    pub amount: Decimal,
    /// Currency the buyer pays with (the processor's `currency2`).
    pub pay_currency: String,
    /// Currency `amount` is denominated in (the processor's `currency1`).
    pub quote_currency: String,
    pub buyer_email: String,
    pub buyer_name: String,
    /// Label shown on the hosted checkout page.
    pub item_label: String,
    /// Echoed back by the processor in every notification.
    pub correlation_token: String,
}

/// A transaction issued by the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayTransaction {
    pub external_tx_id: ExternalTxId,
    pub deposit_address: String,
    /// Amount to pay in the pay-in currency.
    pub amount: Decimal,
    pub confirms_needed: u32,
    pub timeout_seconds: u64,
    pub checkout_url: String,
    pub status_url: String,
    pub qr_url: String,
}

impl GatewayTransaction {
    /// The immutable artifacts persisted with the payment.
    pub fn artifacts(&self) -> GatewayArtifacts {
        GatewayArtifacts {
            deposit_address: self.deposit_address.clone(),
            checkout_url: self.checkout_url.clone(),
            status_url: self.status_url.clone(),
            qr_url: self.qr_url.clone(),
            confirms_needed: self.confirms_needed,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

/// Status snapshot of a transaction as the processor reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// Processor status code.
    pub code: i32,
    /// Human-readable status text.
    pub text: String,
    /// Amount received so far, in the pay-in currency.
    pub received_amount: Decimal,
    pub received_confirms: u32,
}

impl GatewayStatus {
    /// The ledger status this snapshot maps to.
    pub fn payment_status(&self) -> PaymentStatus {
        map_status_code(self.code, self.received_amount)
    }
}

/// Map a processor status code onto the payment lifecycle.
///
/// - `>= 100` or `2`: complete (2 is "queued for payout", funds are final)
/// - `-1`: cancelled or timed out by the processor
/// - other negatives: cancelled
/// - `0..100` with funds seen: partial
/// - otherwise: pending
pub fn map_status_code(code: i32, received_amount: Decimal) -> PaymentStatus {
    match code {
        c if c >= 100 || c == 2 => PaymentStatus::Completed,
        -1 => PaymentStatus::Timeout,
        c if c < 0 => PaymentStatus::Cancelled,
        _ if received_amount > Decimal::ZERO => PaymentStatus::Partial,
        _ => PaymentStatus::Pending,
    }
}
