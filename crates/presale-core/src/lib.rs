//! Presale Core
//!
//! Domain types shared by every layer of the settlement engine: payment
//! records and their lifecycle state machine, user accounts, the append-only
//! transaction history, and the supply-sensitive pricing curve.

pub mod error;
pub mod types;
pub mod state_machine;
pub mod pricing;
pub mod config;

pub use error::CoreError;
pub use types::{
    ExternalTxId, GatewayArtifacts, Payment, PaymentId, TransactionKind, TransactionRecord, User,
    UserId,
};
pub use state_machine::{PaymentStateMachine, PaymentStatus, Transition};
pub use pricing::{commission_for, PricingConfig, Quote};
pub use config::{SaleSettings, SettingsSource, StaticSettings};
