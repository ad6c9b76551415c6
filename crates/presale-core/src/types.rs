use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::state_machine::PaymentStatus;

/// Length of generated referral codes.
const REFERRAL_CODE_LEN: usize = 8;

/// Upper bound on a gateway timeout window (ten years).
const MAX_TIMEOUT_SECS: i64 = 10 * 365 * 24 * 3600;

/// Unique identifier for a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new time-ordered user ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Internally generated payment identifier (UUID v7, time-ordered).
///
/// Also used as the correlation token handed to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gateway-issued transaction id. The idempotency key for settlement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalTxId(String);

impl ExternalTxId {
    /// Create from a gateway-supplied string. Blank ids are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidArgument(
                "external transaction id must not be empty".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Artifacts issued by the gateway when a deposit transaction is created.
/// Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayArtifacts {
    /// Crypto address the buyer pays into.
    pub deposit_address: String,
    /// Hosted checkout page.
    pub checkout_url: String,
    /// Hosted status page.
    pub status_url: String,
    /// QR code image for the deposit address.
    pub qr_url: String,
    /// Confirmations the gateway waits for before completing.
    pub confirms_needed: u32,
    /// Seconds the buyer has to pay before the transaction times out.
    pub timeout_seconds: u64,
}

/// One external deposit attempt, tracked end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub external_tx_id: ExternalTxId,
    pub user_id: UserId,
    /// Requested amount in the quote currency.
    pub amount: Decimal,
    /// Currency the buyer pays in (e.g. BTC).
    pub pay_currency: String,
    /// Currency the amount is denominated in (e.g. USD).
    pub quote_currency: String,
    /// Amount the gateway asked for in the pay-in currency.
    pub pay_amount: Decimal,
    /// Tokens quoted at creation time.
    pub token_amount: Decimal,
    /// Amount the gateway has reported as received so far.
    pub received_amount: Decimal,
    /// Commission owed to the referrer, fixed at creation.
    pub referral_commission: Decimal,
    pub artifacts: GatewayArtifacts,
    pub status: PaymentStatus,
    pub referral_paid: bool,
    /// Amount credited to the buyer at settlement.
    pub credited_amount: Option<Decimal>,
    /// Set when settlement credited the requested amount because the
    /// gateway reported nothing received. Flagged for audit.
    pub fallback_credit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// When the gateway timeout window closes.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let secs = i64::try_from(self.artifacts.timeout_seconds)
            .unwrap_or(MAX_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);
        self.created_at + Duration::seconds(secs)
    }

    /// Whether the timeout window has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Convert an amount received in the pay-in currency into the quote
    /// currency at the rate fixed when the gateway issued the transaction.
    /// Truncated to 8 decimal places.
    pub fn quote_equivalent(&self, received_pay: Decimal) -> Decimal {
        if self.pay_amount <= Decimal::ZERO {
            return received_pay;
        }
        received_pay
            .checked_mul(self.amount)
            .and_then(|v| v.checked_div(self.pay_amount))
            .unwrap_or(received_pay)
            .round_dp_with_strategy(8, RoundingStrategy::ToZero)
    }
}

/// A user account, as far as settlement is concerned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// The code other users quote to name this user as their referrer.
    pub referral_code: String,
    /// Referral code of the user who referred this one.
    pub referred_by: Option<String>,
    /// Non-negative point balance.
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a user with a zero balance and a fresh referral code.
    pub fn new(email: impl Into<String>, referred_by: Option<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
            referral_code: generate_referral_code(),
            referred_by: referred_by.map(|c| c.trim().to_ascii_uppercase()),
            balance: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }
}

/// Generate a random uppercase alphanumeric referral code.
pub fn generate_referral_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LEN)
        .map(char::from)
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Kind of balance movement recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Buyer credit from a settled deposit.
    Deposit,
    /// Referrer credit derived from someone else's deposit.
    ReferralCommission,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::ReferralCommission => write!(f, "referral_commission"),
        }
    }
}

/// Append-only history entry explaining one balance increase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    /// The external transaction that caused this entry.
    pub external_ref: ExternalTxId,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// New completed history entry.
    pub fn completed(
        user_id: UserId,
        kind: TransactionKind,
        amount: Decimal,
        currency: impl Into<String>,
        external_ref: ExternalTxId,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            kind,
            amount,
            currency: currency.into(),
            status: PaymentStatus::Completed,
            external_ref,
            created_at: Utc::now(),
        }
    }
}
