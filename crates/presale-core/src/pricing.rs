//! Supply-sensitive token pricing.
//!
//! The price of one token rises linearly with the share of the supply that
//! has already been sold: at zero supply a token costs the base price, at
//! full supply it costs three times the base price.
//!
//! ```text
//! supply_ratio     = current_supply / max_supply
//! price_multiplier = 1 + 2 * supply_ratio
//! effective_price  = base_price * price_multiplier
//! tokens           = floor(target / effective_price * 1e8) / 1e8
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Token amounts are truncated to this many decimal places.
pub const TOKEN_DECIMALS: u32 = 8;

/// Snapshot of the three configuration values the price curve reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Price of one token at zero supply, in the quote currency.
    pub base_price: Decimal,
    /// Tokens sold so far.
    pub current_supply: Decimal,
    /// Total tokens available for sale.
    pub max_supply: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_price: Decimal::ONE,
            current_supply: Decimal::ZERO,
            max_supply: Decimal::from(1_000_000u64),
        }
    }
}

/// The result of a quote, with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub target_amount: Decimal,
    pub base_price: Decimal,
    pub supply_ratio: Decimal,
    pub effective_price: Decimal,
    pub token_amount: Decimal,
}

impl PricingConfig {
    /// Reject inconsistent configuration before it reaches the curve.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_supply.is_zero() {
            return Err(CoreError::ConfigurationError(
                "max supply must not be zero".into(),
            ));
        }
        if self.max_supply < Decimal::ZERO {
            return Err(CoreError::ConfigurationError(format!(
                "max supply must be positive, got {}",
                self.max_supply
            )));
        }
        if self.base_price <= Decimal::ZERO {
            return Err(CoreError::ConfigurationError(format!(
                "base price must be positive, got {}",
                self.base_price
            )));
        }
        if self.current_supply < Decimal::ZERO {
            return Err(CoreError::ConfigurationError(format!(
                "current supply must not be negative, got {}",
                self.current_supply
            )));
        }
        Ok(())
    }

    /// `current_supply / max_supply`.
    pub fn supply_ratio(&self) -> Result<Decimal, CoreError> {
        self.validate()?;
        self.current_supply
            .checked_div(self.max_supply)
            .ok_or_else(|| CoreError::ConfigurationError("supply ratio overflow".into()))
    }

    /// Price of one token at the current supply.
    pub fn effective_price(&self) -> Result<Decimal, CoreError> {
        let ratio = self.supply_ratio()?;
        let multiplier = Decimal::ONE
            .checked_add(Decimal::TWO.checked_mul(ratio).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;
        self.base_price.checked_mul(multiplier).ok_or_else(overflow)
    }

    /// How many tokens `target_amount` buys, truncated to 8 decimal places.
    pub fn quote(&self, target_amount: Decimal) -> Result<Quote, CoreError> {
        if target_amount <= Decimal::ZERO {
            return Err(CoreError::InvalidArgument(format!(
                "target amount must be positive, got {}",
                target_amount
            )));
        }

        let supply_ratio = self.supply_ratio()?;
        let effective_price = self.effective_price()?;
        let token_amount = target_amount
            .checked_div(effective_price)
            .ok_or_else(|| {
                CoreError::InvalidArgument(format!("target amount too large: {}", target_amount))
            })?
            .round_dp_with_strategy(TOKEN_DECIMALS, RoundingStrategy::ToZero);

        Ok(Quote {
            target_amount,
            base_price: self.base_price,
            supply_ratio,
            effective_price,
            token_amount,
        })
    }
}

fn overflow() -> CoreError {
    CoreError::ConfigurationError("pricing arithmetic overflow".into())
}

/// Referral commission owed on `amount` at `percent` (0 to 100).
///
/// Computed once when a payment is created and stored with it.
pub fn commission_for(amount: Decimal, percent: Decimal) -> Result<Decimal, CoreError> {
    if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
        return Err(CoreError::ConfigurationError(format!(
            "commission percent must be within 0..=100, got {}",
            percent
        )));
    }
    amount
        .checked_mul(percent)
        .map(|v| v / Decimal::ONE_HUNDRED)
        .ok_or_else(|| CoreError::InvalidArgument(format!("amount too large: {}", amount)))
}
