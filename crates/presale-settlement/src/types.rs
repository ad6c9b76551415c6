use chrono::{DateTime, Utc};
use presale_core::{ExternalTxId, Payment, PaymentId, PaymentStatus, Quote, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A request to open a purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayment {
    pub user_id: UserId,
    /// Requested amount in the quote currency.
    pub amount: Decimal,
    /// Currency the buyer pays in.
    pub pay_currency: String,
    /// Currency `amount` is denominated in.
    pub quote_currency: String,
    /// Falls back to the account email when empty.
    #[serde(default)]
    pub buyer_email: String,
    #[serde(default)]
    pub buyer_name: String,
    #[serde(default)]
    pub item_name: String,
}

/// What the buyer needs to pay, returned when a payment is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentQuote {
    pub payment_id: PaymentId,
    pub external_tx_id: ExternalTxId,
    pub amount: Decimal,
    pub quote_currency: String,
    pub pay_amount: Decimal,
    pub pay_currency: String,
    pub token_amount: Decimal,
    pub effective_price: Decimal,
    pub referral_commission: Decimal,
    pub deposit_address: String,
    pub checkout_url: String,
    pub status_url: String,
    pub qr_url: String,
    pub confirms_needed: u32,
    pub expires_at: DateTime<Utc>,
}

impl PaymentQuote {
    pub(crate) fn new(payment: &Payment, quote: &Quote) -> Self {
        Self {
            payment_id: payment.id,
            external_tx_id: payment.external_tx_id.clone(),
            amount: payment.amount,
            quote_currency: payment.quote_currency.clone(),
            pay_amount: payment.pay_amount,
            pay_currency: payment.pay_currency.clone(),
            token_amount: payment.token_amount,
            effective_price: quote.effective_price,
            referral_commission: payment.referral_commission,
            deposit_address: payment.artifacts.deposit_address.clone(),
            checkout_url: payment.artifacts.checkout_url.clone(),
            status_url: payment.artifacts.status_url.clone(),
            qr_url: payment.artifacts.qr_url.clone(),
            confirms_needed: payment.artifacts.confirms_needed,
            expires_at: payment.expires_at(),
        }
    }
}

/// Everything a completed settlement moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub payment_id: PaymentId,
    pub external_tx_id: ExternalTxId,
    pub buyer: UserId,
    pub credited_amount: Decimal,
    /// The gateway reported nothing received and the requested amount was
    /// credited instead.
    pub fallback_credit: bool,
    pub referrer: Option<UserId>,
    /// Commission paid by this settlement; zero when none was due.
    pub referral_commission: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// Outcome of applying one status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementResult {
    /// The payment was already terminal; nothing changed.
    AlreadySettled {
        external_tx_id: ExternalTxId,
        status: PaymentStatus,
    },
    /// This report completed the payment.
    Settled(SettlementReceipt),
    /// Status or received amount recorded, no balance moved.
    StatusUpdated {
        external_tx_id: ExternalTxId,
        status: PaymentStatus,
        received_amount: Decimal,
    },
    /// An out-of-order report older than what is stored; discarded.
    Stale {
        external_tx_id: ExternalTxId,
        status: PaymentStatus,
        reported: PaymentStatus,
    },
}

impl SettlementResult {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }

    pub fn external_tx_id(&self) -> &ExternalTxId {
        match self {
            Self::AlreadySettled { external_tx_id, .. }
            | Self::StatusUpdated { external_tx_id, .. }
            | Self::Stale { external_tx_id, .. } => external_tx_id,
            Self::Settled(receipt) => &receipt.external_tx_id,
        }
    }
}
