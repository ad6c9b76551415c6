//! Inbound payment notifications (IPN).
//!
//! Parsing happens only after the signature over the raw body has been
//! verified; nothing in this module authenticates anything.

use std::collections::BTreeMap;
use std::str::FromStr;

use presale_core::{ExternalTxId, PaymentStatus};
use rust_decimal::Decimal;

use crate::error::GatewayError;
use crate::signing::parse_form;
use crate::types::{map_status_code, GatewayStatus};

/// A parsed status notification.
#[derive(Debug, Clone, PartialEq)]
pub struct IpnNotification {
    pub external_tx_id: ExternalTxId,
    /// Processor status code.
    pub status_code: i32,
    pub status_text: String,
    /// Received so far, in the pay-in currency.
    pub received_amount: Decimal,
    pub received_confirms: u32,
    /// Merchant account the notification is addressed to.
    pub merchant: Option<String>,
    /// Correlation token echoed back from transaction creation.
    pub custom: Option<String>,
}

impl IpnNotification {
    /// Parse a verified URL-encoded notification body.
    pub fn parse(raw_payload: &[u8]) -> Result<Self, GatewayError> {
        let fields = parse_form(raw_payload)?;
        Self::from_fields(&fields)
    }

    fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, GatewayError> {
        let txn_id = required(fields, "txn_id")?;
        let external_tx_id = ExternalTxId::new(txn_id)
            .map_err(|e| GatewayError::MalformedCallback(e.to_string()))?;

        let status_code = required(fields, "status")?
            .trim()
            .parse::<i32>()
            .map_err(|e| GatewayError::MalformedCallback(format!("status: {}", e)))?;

        let received_amount = match fields.get("received_amount") {
            Some(raw) if !raw.trim().is_empty() => Decimal::from_str(raw.trim())
                .map_err(|e| GatewayError::MalformedCallback(format!("received_amount: {}", e)))?,
            _ => Decimal::ZERO,
        };
        if received_amount < Decimal::ZERO {
            return Err(GatewayError::MalformedCallback(format!(
                "received_amount must not be negative, got {}",
                received_amount
            )));
        }

        let received_confirms = match fields.get("received_confirms") {
            Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<u32>().map_err(|e| {
                GatewayError::MalformedCallback(format!("received_confirms: {}", e))
            })?,
            _ => 0,
        };

        Ok(Self {
            external_tx_id,
            status_code,
            status_text: fields.get("status_text").cloned().unwrap_or_default(),
            received_amount,
            received_confirms,
            merchant: fields.get("merchant").cloned(),
            custom: fields.get("custom").cloned(),
        })
    }

    /// The ledger status this notification maps to.
    pub fn payment_status(&self) -> PaymentStatus {
        map_status_code(self.status_code, self.received_amount)
    }

    /// View as a status snapshot, the same shape a poll returns.
    pub fn gateway_status(&self) -> GatewayStatus {
        GatewayStatus {
            code: self.status_code,
            text: self.status_text.clone(),
            received_amount: self.received_amount,
            received_confirms: self.received_confirms,
        }
    }
}

fn required<'a>(
    fields: &'a BTreeMap<String, String>,
    name: &str,
) -> Result<&'a String, GatewayError> {
    fields
        .get(name)
        .ok_or_else(|| GatewayError::MalformedCallback(format!("missing field: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_complete_notification() {
        let raw = b"ipn_mode=hmac&merchant=m-1&txn_id=CPX9&status=100&status_text=Complete&received_amount=0.0025&received_confirms=3&custom=0190";
        let ipn = IpnNotification::parse(raw).unwrap();
        assert_eq!(ipn.external_tx_id.as_str(), "CPX9");
        assert_eq!(ipn.status_code, 100);
        assert_eq!(ipn.status_text, "Complete");
        assert_eq!(ipn.received_amount, dec!(0.0025));
        assert_eq!(ipn.received_confirms, 3);
        assert_eq!(ipn.merchant.as_deref(), Some("m-1"));
        assert_eq!(ipn.custom.as_deref(), Some("0190"));
        assert_eq!(ipn.payment_status(), PaymentStatus::Completed);
    }

    #[test]
    fn test_missing_received_amount_is_zero() {
        let ipn = IpnNotification::parse(b"txn_id=CPX1&status=0").unwrap();
        assert_eq!(ipn.received_amount, Decimal::ZERO);
        assert_eq!(ipn.payment_status(), PaymentStatus::Pending);
    }

    #[test]
    fn test_missing_txn_id_is_malformed() {
        let result = IpnNotification::parse(b"status=100");
        assert!(matches!(result, Err(GatewayError::MalformedCallback(_))));
    }

    #[test]
    fn test_non_numeric_status_is_malformed() {
        let result = IpnNotification::parse(b"txn_id=CPX1&status=done");
        assert!(matches!(result, Err(GatewayError::MalformedCallback(_))));
    }

    #[test]
    fn test_negative_received_is_malformed() {
        let result = IpnNotification::parse(b"txn_id=CPX1&status=1&received_amount=-1");
        assert!(matches!(result, Err(GatewayError::MalformedCallback(_))));
    }

    #[test]
    fn test_timeout_notification() {
        let ipn =
            IpnNotification::parse(b"txn_id=CPX1&status=-1&status_text=Cancelled+%2F+Timed+Out")
                .unwrap();
        assert_eq!(ipn.status_text, "Cancelled / Timed Out");
        assert_eq!(ipn.payment_status(), PaymentStatus::Timeout);
        assert_eq!(ipn.gateway_status().code, -1);
    }
}
