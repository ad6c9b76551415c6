//! HMAC-SHA512 request signing and callback verification.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::error::GatewayError;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the signature on both outbound requests and inbound
/// notifications.
pub const SIGNATURE_HEADER: &str = "HMAC";

/// Sign `message` with `key`, returning the lowercase hex digest.
pub fn sign(key: &[u8], message: &[u8]) -> String {
    hex::encode(mac_for(key, message).finalize().into_bytes())
}

/// Verify a hex signature over `message` in constant time.
///
/// Malformed hex is a mismatch, never an error.
pub fn verify(key: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    mac_for(key, message).verify_slice(&expected).is_ok()
}

fn mac_for(key: &[u8], message: &[u8]) -> HmacSha512 {
    // HMAC accepts keys of any length, so keying cannot fail.
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(message);
    mac
}

/// Parse a URL-encoded form body into a key-sorted map.
///
/// Repeated keys are rejected: a payload where the same field appears twice
/// has no single canonical form.
pub fn parse_form(raw: &[u8]) -> Result<BTreeMap<String, String>, GatewayError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(raw)
        .map_err(|e| GatewayError::MalformedCallback(e.to_string()))?;

    let mut fields = BTreeMap::new();
    for (key, value) in pairs {
        if fields.insert(key.clone(), value).is_some() {
            return Err(GatewayError::MalformedCallback(format!(
                "duplicate field: {}",
                key
            )));
        }
    }
    Ok(fields)
}

/// Canonical serialization signed by the processor: fields sorted by key,
/// each form-encoded as `key=value`, joined with `&`.
pub fn canonical_payload(fields: &BTreeMap<String, String>) -> Result<String, GatewayError> {
    serde_urlencoded::to_string(fields).map_err(|e| GatewayError::Encoding(e.to_string()))
}

/// Verify a raw notification body against the signature supplied with it.
pub fn verify_payload(secret: &[u8], raw_payload: &[u8], signature_hex: &str) -> bool {
    let Ok(fields) = parse_form(raw_payload) else {
        return false;
    };
    let Ok(canonical) = canonical_payload(&fields) else {
        return false;
    };
    verify(secret, canonical.as_bytes(), signature_hex)
}

/// Produce a signed notification body from `fields`. Returns the canonical
/// body and its signature.
pub fn sign_payload(
    secret: &[u8],
    fields: &BTreeMap<String, String>,
) -> Result<(String, String), GatewayError> {
    let body = canonical_payload(fields)?;
    let signature = sign(secret, body.as_bytes());
    Ok((body, signature))
}
