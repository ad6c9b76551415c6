use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use presale_core::ExternalTxId;
use rust_decimal::Decimal;

use crate::error::GatewayError;
use crate::signing;
use crate::traits::PaymentGateway;
use crate::types::{CreateTransaction, GatewayStatus, GatewayTransaction};

const DEFAULT_CURRENCIES: &[&str] = &["BTC", "ETH", "LTC", "USDT"];
const DEFAULT_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone)]
struct SandboxTx {
    status: GatewayStatus,
    correlation_token: String,
}

/// In-process gateway for local runs and tests.
///
/// Converts 1:1 between quote and pay-in currency, issues deterministic
/// `SBX` transaction ids, and lets the caller drive each transaction's
/// status by hand. Notifications are signed with the configured IPN secret
/// exactly as the hosted processor would sign them.
pub struct SandboxGateway {
    transactions: DashMap<String, SandboxTx>,
    next_id: AtomicU64,
    currencies: HashSet<String>,
    ipn_secret: Vec<u8>,
    timeout_seconds: u64,
    unavailable: AtomicBool,
}

impl SandboxGateway {
    pub fn new(ipn_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            transactions: DashMap::new(),
            next_id: AtomicU64::new(1),
            currencies: DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect(),
            ipn_secret: ipn_secret.into(),
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Transaction timeout reported for new transactions.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Replace the set of accepted pay-in currencies.
    pub fn with_currencies<I, S>(mut self, currencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.currencies = currencies
            .into_iter()
            .map(|c| c.into().to_uppercase())
            .collect();
        self
    }

    /// Simulate a processor outage: every API call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Move a transaction to a processor status code with `received` seen so far.
    pub fn set_status(
        &self,
        external_tx_id: &ExternalTxId,
        code: i32,
        received: Decimal,
    ) -> Result<(), GatewayError> {
        let mut tx = self
            .transactions
            .get_mut(external_tx_id.as_str())
            .ok_or_else(|| GatewayError::Rejected(format!("unknown txid {}", external_tx_id)))?;
        tx.status.code = code;
        tx.status.text = status_text(code).to_string();
        tx.status.received_amount = received;
        Ok(())
    }

    /// Build a signed notification body for the transaction's current status.
    pub fn notification_for(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<(String, String), GatewayError> {
        let tx = self
            .transactions
            .get(external_tx_id.as_str())
            .ok_or_else(|| GatewayError::Rejected(format!("unknown txid {}", external_tx_id)))?;

        let mut fields = BTreeMap::new();
        fields.insert("ipn_type".to_string(), "api".to_string());
        fields.insert("txn_id".to_string(), external_tx_id.to_string());
        fields.insert("status".to_string(), tx.status.code.to_string());
        fields.insert("status_text".to_string(), tx.status.text.clone());
        fields.insert(
            "received_amount".to_string(),
            tx.status.received_amount.to_string(),
        );
        fields.insert(
            "received_confirms".to_string(),
            tx.status.received_confirms.to_string(),
        );
        fields.insert("custom".to_string(), tx.correlation_token.clone());
        self.sign_callback(&fields)
    }

    /// Sign arbitrary notification fields. Returns the body and signature.
    pub fn sign_callback(
        &self,
        fields: &BTreeMap<String, String>,
    ) -> Result<(String, String), GatewayError> {
        signing::sign_payload(&self.ipn_secret, fields)
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Drop a transaction, as a processor does once it purges old records.
    /// Later lookups are rejected as unknown.
    pub fn forget(&self, external_tx_id: &ExternalTxId) -> bool {
        self.transactions.remove(external_tx_id.as_str()).is_some()
    }

    fn ensure_available(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("sandbox gateway offline".into()));
        }
        Ok(())
    }
}

fn status_text(code: i32) -> &'static str {
    match code {
        c if c >= 100 => "Complete",
        2 => "Queued for nightly payout",
        1 => "Funds received, pending confirmation",
        0 => "Waiting for buyer funds",
        -1 => "Cancelled / Timed Out",
        _ => "Cancelled",
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn create_transaction(
        &self,
        request: &CreateTransaction,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.ensure_available()?;

        let currency = request.pay_currency.to_uppercase();
        if !self.currencies.contains(&currency) {
            return Err(GatewayError::Rejected(format!(
                "unsupported currency {}",
                request.pay_currency
            )));
        }
        if request.amount <= Decimal::ZERO {
            return Err(GatewayError::Rejected("amount must be positive".into()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let txn_id = format!("SBX{:08}", n);
        let external_tx_id = ExternalTxId::new(txn_id.clone())
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        self.transactions.insert(
            txn_id.clone(),
            SandboxTx {
                status: GatewayStatus {
                    code: 0,
                    text: status_text(0).to_string(),
                    received_amount: Decimal::ZERO,
                    received_confirms: 0,
                },
                correlation_token: request.correlation_token.clone(),
            },
        );

        tracing::debug!(%external_tx_id, currency = %currency, "sandbox transaction created");

        Ok(GatewayTransaction {
            external_tx_id,
            deposit_address: format!("sbx-{}-{:08}", currency.to_lowercase(), n),
            amount: request.amount,
            confirms_needed: 1,
            timeout_seconds: self.timeout_seconds,
            checkout_url: format!("https://sandbox.invalid/checkout/{}", txn_id),
            status_url: format!("https://sandbox.invalid/status/{}", txn_id),
            qr_url: format!("https://sandbox.invalid/qr/{}", txn_id),
        })
    }

    async fn get_transaction_status(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<GatewayStatus, GatewayError> {
        self.ensure_available()?;
        self.transactions
            .get(external_tx_id.as_str())
            .map(|tx| tx.status.clone())
            .ok_or_else(|| GatewayError::Rejected(format!("unknown txid {}", external_tx_id)))
    }

    fn verify_callback_signature(&self, raw_payload: &[u8], supplied_signature: &str) -> bool {
        signing::verify_payload(&self.ipn_secret, raw_payload, supplied_signature)
    }

    fn gateway_id(&self) -> &str {
        "gw-sandbox"
    }
}
