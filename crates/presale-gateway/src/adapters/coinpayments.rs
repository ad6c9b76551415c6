use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use presale_core::ExternalTxId;
use reqwest::header::CONTENT_TYPE;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::GatewayError;
use crate::signing::{self, SIGNATURE_HEADER};
use crate::traits::PaymentGateway;
use crate::types::{CreateTransaction, GatewayStatus, GatewayTransaction};

const API_VERSION: &str = "1";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Non-secret connection settings for the hosted processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinPaymentsConfig {
    /// API endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Public API key, sent in the request body.
    #[serde(default)]
    pub public_key: String,
    /// Merchant account id; notifications for other merchants are refused.
    #[serde(default)]
    pub merchant_id: String,
    /// Where the processor should POST status notifications.
    #[serde(default)]
    pub ipn_url: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://www.coinpayments.net/api.php".into()
}
fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for CoinPaymentsConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            public_key: String::new(),
            merchant_id: String::new(),
            ipn_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Keys that never leave the process: the private key signs outbound
/// requests, the IPN secret authenticates inbound notifications.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GatewaySecrets {
    private_key: String,
    ipn_secret: String,
}

impl GatewaySecrets {
    pub fn new(private_key: impl Into<String>, ipn_secret: impl Into<String>) -> Self {
        Self {
            private_key: private_key.into(),
            ipn_secret: ipn_secret.into(),
        }
    }

    pub fn ipn_secret(&self) -> &[u8] {
        self.ipn_secret.as_bytes()
    }

    fn private_key(&self) -> &[u8] {
        self.private_key.as_bytes()
    }
}

impl fmt::Debug for GatewaySecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySecrets")
            .field("private_key", &"<redacted>")
            .field("ipn_secret", &"<redacted>")
            .finish()
    }
}

/// Response envelope shared by every API command.
#[derive(Deserialize)]
struct ApiEnvelope {
    error: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CreateResult {
    txn_id: String,
    address: String,
    amount: Decimal,
    #[serde(deserialize_with = "lenient_u64")]
    confirms_needed: u64,
    #[serde(deserialize_with = "lenient_u64")]
    timeout: u64,
    #[serde(default)]
    checkout_url: String,
    #[serde(default)]
    status_url: String,
    #[serde(default)]
    qrcode_url: String,
}

#[derive(Deserialize)]
struct TxInfoResult {
    status: i32,
    #[serde(default)]
    status_text: String,
    #[serde(default)]
    receivedf: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_u64")]
    recv_confirms: u64,
}

/// The processor sends some integers as JSON strings.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrText {
        Num(u64),
        Text(String),
    }

    match NumOrText::deserialize(deserializer)? {
        NumOrText::Num(n) => Ok(n),
        NumOrText::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// HTTP client for a CoinPayments-style hosted crypto payment processor.
///
/// Every call is a form POST to a single endpoint; the `HMAC` header holds
/// HMAC-SHA512 of the exact body, keyed by the private key.
pub struct CoinPaymentsClient {
    http: reqwest::Client,
    config: CoinPaymentsConfig,
    secrets: GatewaySecrets,
}

impl CoinPaymentsClient {
    pub fn new(config: CoinPaymentsConfig, secrets: GatewaySecrets) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            config,
            secrets,
        })
    }

    /// Encode, sign, send, and unwrap one API command.
    async fn call<T: DeserializeOwned>(
        &self,
        cmd: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, GatewayError> {
        let mut fields: Vec<(&str, String)> = vec![
            ("version", API_VERSION.to_string()),
            ("cmd", cmd.to_string()),
            ("key", self.config.public_key.clone()),
            ("format", "json".to_string()),
        ];
        fields.extend(params);

        let body = serde_urlencoded::to_string(&fields)
            .map_err(|e| GatewayError::Encoding(e.to_string()))?;
        let signature = signing::sign(self.secrets.private_key(), body.as_bytes());

        tracing::debug!(cmd, url = %self.config.api_url, "gateway request");

        let response = self
            .http
            .post(&self.config.api_url)
            .header(SIGNATURE_HEADER, signature)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "{} returned HTTP {}",
                cmd, status
            )));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if envelope.error != "ok" {
            tracing::warn!(cmd, error = %envelope.error, "gateway refused request");
            return Err(GatewayError::Rejected(envelope.error));
        }

        let result = envelope
            .result
            .ok_or_else(|| GatewayError::InvalidResponse(format!("{}: missing result", cmd)))?;
        serde_json::from_value(result)
            .map_err(|e| GatewayError::InvalidResponse(format!("{}: {}", cmd, e)))
    }
}

#[async_trait]
impl PaymentGateway for CoinPaymentsClient {
    async fn create_transaction(
        &self,
        request: &CreateTransaction,
    ) -> Result<GatewayTransaction, GatewayError> {
        let mut params = vec![
            ("amount", request.amount.to_string()),
            ("currency1", request.quote_currency.clone()),
            ("currency2", request.pay_currency.clone()),
            ("buyer_email", request.buyer_email.clone()),
            ("buyer_name", request.buyer_name.clone()),
            ("item_name", request.item_label.clone()),
            ("custom", request.correlation_token.clone()),
        ];
        if let Some(ref ipn_url) = self.config.ipn_url {
            params.push(("ipn_url", ipn_url.clone()));
        }

        let result: CreateResult = self.call("create_transaction", params).await?;
        let external_tx_id = ExternalTxId::new(result.txn_id)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        tracing::info!(
            external_tx_id = %external_tx_id,
            correlation = %request.correlation_token,
            "gateway transaction created"
        );

        Ok(GatewayTransaction {
            external_tx_id,
            deposit_address: result.address,
            amount: result.amount,
            confirms_needed: u32::try_from(result.confirms_needed).unwrap_or(u32::MAX),
            timeout_seconds: result.timeout,
            checkout_url: result.checkout_url,
            status_url: result.status_url,
            qr_url: result.qrcode_url,
        })
    }

    async fn get_transaction_status(
        &self,
        external_tx_id: &ExternalTxId,
    ) -> Result<GatewayStatus, GatewayError> {
        let result: TxInfoResult = self
            .call("get_tx_info", vec![("txid", external_tx_id.to_string())])
            .await?;
        Ok(GatewayStatus {
            code: result.status,
            text: result.status_text,
            received_amount: result.receivedf.unwrap_or(Decimal::ZERO),
            received_confirms: u32::try_from(result.recv_confirms).unwrap_or(u32::MAX),
        })
    }

    fn verify_callback_signature(&self, raw_payload: &[u8], supplied_signature: &str) -> bool {
        if !signing::verify_payload(self.secrets.ipn_secret(), raw_payload, supplied_signature) {
            return false;
        }
        if self.config.merchant_id.is_empty() {
            return true;
        }
        // Signed, but possibly for another merchant account sharing the secret.
        match signing::parse_form(raw_payload) {
            Ok(fields) => fields.get("merchant") == Some(&self.config.merchant_id),
            Err(_) => false,
        }
    }

    fn gateway_id(&self) -> &str {
        "gw-coinpayments"
    }
}
