use std::sync::{PoisonError, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pricing::PricingConfig;

/// Sale-wide settings read when quoting and when creating a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleSettings {
    /// Inputs to the token price curve.
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Referral commission as a percentage of the requested amount.
    #[serde(default = "default_commission_percent")]
    pub commission_percent: Decimal,
}

fn default_commission_percent() -> Decimal {
    Decimal::from(5u32)
}

impl Default for SaleSettings {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            commission_percent: default_commission_percent(),
        }
    }
}

/// Source of the current sale settings.
///
/// Generic settings storage lives outside the engine; this is the seam it
/// plugs into. Every read returns a consistent snapshot.
pub trait SettingsSource: Send + Sync {
    fn snapshot(&self) -> SaleSettings;
}

/// In-process settings holder, updatable at runtime.
#[derive(Debug, Default)]
pub struct StaticSettings {
    inner: RwLock<SaleSettings>,
}

impl StaticSettings {
    pub fn new(settings: SaleSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    /// Replace the whole settings snapshot.
    pub fn replace(&self, settings: SaleSettings) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    /// Update the sold supply used by the price curve.
    pub fn set_current_supply(&self, supply: Decimal) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .pricing
            .current_supply = supply;
        tracing::info!(%supply, "current supply updated");
    }

    /// Update the referral commission percentage. Existing payments keep
    /// the commission computed when they were created.
    pub fn set_commission_percent(&self, percent: Decimal) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .commission_percent = percent;
        tracing::info!(%percent, "commission percent updated");
    }
}

impl SettingsSource for StaticSettings {
    fn snapshot(&self) -> SaleSettings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
