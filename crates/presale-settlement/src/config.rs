use serde::{Deserialize, Serialize};

/// Settlement engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts at the settlement transaction before giving up on lock
    /// contention.
    #[serde(default = "default_max_settlement_attempts")]
    pub max_settlement_attempts: u32,
    /// Base backoff between attempts; grows linearly per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_max_settlement_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    25
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_settlement_attempts: default_max_settlement_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Background reconciliation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How long past expiry an unreachable gateway is waited on before the
    /// payment is timed out anyway.
    #[serde(default = "default_unavailable_grace_secs")]
    pub unavailable_grace_secs: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    60
}
fn default_unavailable_grace_secs() -> u64 {
    86_400
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval_secs(),
            unavailable_grace_secs: default_unavailable_grace_secs(),
        }
    }
}
