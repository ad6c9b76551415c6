//! Presale Settlement Layer
//!
//! Drives each payment from creation to a terminal state. Status reports
//! arrive from signed gateway notifications or from the reconciler's polls;
//! a `completed` report credits the buyer, pays the referrer at most once,
//! and marks the payment settled in one ledger transaction.

pub mod error;
pub mod types;
pub mod config;
pub mod referral;
pub mod engine;
pub mod reconciler;

pub use error::SettlementError;
pub use types::{NewPayment, PaymentQuote, SettlementReceipt, SettlementResult};
pub use config::{EngineConfig, ReconcilerConfig};
pub use referral::{ReferralCodeResolver, ReferralResolver};
pub use engine::SettlementEngine;
pub use reconciler::{ReconcileReport, Reconciler};
