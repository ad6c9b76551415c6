//! Node configuration loading and management.

use presale_core::{PricingConfig, SaleSettings};
use presale_gateway::{CoinPaymentsConfig, GatewaySecrets};
use presale_settlement::{EngineConfig, ReconcilerConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Full configuration for the presale node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PresaleConfig {
    /// API server settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Ledger storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Payment gateway connection.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Token price curve.
    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub referral: ReferralConfig,

    #[serde(default)]
    pub settlement: EngineConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API listen address.
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
    /// API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Rocksdb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Path to the data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// How long a transaction waits for a row lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// In-process sandbox; no network traffic.
    Sandbox,
    /// Hosted CoinPayments-style processor.
    Coinpayments,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_kind")]
    pub kind: GatewayKind,
    #[serde(default = "default_gateway_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub ipn_secret: String,
    #[serde(default)]
    pub merchant_id: String,
    /// Public URL of this node's `/api/v1/ipn` endpoint.
    #[serde(default)]
    pub ipn_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    /// Percentage of each purchase credited to the referrer.
    #[serde(default = "default_commission_percent")]
    pub commission_percent: Decimal,
}

// Default value functions
fn default_api_addr() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    9100
}
fn default_backend() -> StorageBackend {
    StorageBackend::Rocksdb
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_lock_timeout_ms() -> i64 {
    presale_ledger::rocks::DEFAULT_LOCK_TIMEOUT_MS
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_gateway_kind() -> GatewayKind {
    GatewayKind::Sandbox
}
fn default_gateway_api_url() -> String {
    CoinPaymentsConfig::default().api_url
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_commission_percent() -> Decimal {
    Decimal::from(5u32)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_addr(),
            port: default_api_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kind: default_gateway_kind(),
            api_url: default_gateway_api_url(),
            public_key: String::new(),
            private_key: String::new(),
            ipn_secret: String::new(),
            merchant_id: String::new(),
            ipn_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("kind", &self.kind)
            .field("api_url", &self.api_url)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("ipn_secret", &"<redacted>")
            .field("merchant_id", &self.merchant_id)
            .field("ipn_url", &self.ipn_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            commission_percent: default_commission_percent(),
        }
    }
}

impl GatewayConfig {
    pub fn client_config(&self) -> CoinPaymentsConfig {
        CoinPaymentsConfig {
            api_url: self.api_url.clone(),
            public_key: self.public_key.clone(),
            merchant_id: self.merchant_id.clone(),
            ipn_url: self.ipn_url.clone(),
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    pub fn secrets(&self) -> GatewaySecrets {
        GatewaySecrets::new(self.private_key.clone(), self.ipn_secret.clone())
    }
}

impl PresaleConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: PresaleConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.pricing.validate()?;
        presale_core::commission_for(Decimal::ONE, self.referral.commission_percent)?;
        if self.gateway.ipn_secret.is_empty() {
            anyhow::bail!("gateway.ipn_secret must be set");
        }
        if self.gateway.kind == GatewayKind::Coinpayments
            && (self.gateway.public_key.is_empty() || self.gateway.private_key.is_empty())
        {
            anyhow::bail!("gateway.public_key and gateway.private_key are required for coinpayments");
        }
        self.api_socket_addr()?;
        Ok(())
    }

    pub fn sale_settings(&self) -> SaleSettings {
        SaleSettings {
            pricing: self.pricing.clone(),
            commission_percent: self.referral.commission_percent,
        }
    }

    /// The API listen socket address.
    pub fn api_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.api.listen_addr, self.api.port).parse()?)
    }
}
