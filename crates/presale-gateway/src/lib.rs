//! Presale Gateway Layer
//!
//! Talks to the external payment processor: creates deposit transactions,
//! polls their status, and authenticates inbound status notifications (IPN).
//! Every outbound request is signed with HMAC-SHA512 over the exact request
//! body; every inbound notification is verified before any field is read.

pub mod error;
pub mod types;
pub mod traits;
pub mod signing;
pub mod ipn;
pub mod adapters;

pub use error::GatewayError;
pub use types::{map_status_code, CreateTransaction, GatewayStatus, GatewayTransaction};
pub use traits::PaymentGateway;
pub use ipn::IpnNotification;
pub use adapters::coinpayments::{CoinPaymentsClient, CoinPaymentsConfig, GatewaySecrets};
pub use adapters::sandbox::SandboxGateway;
