use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
const ALGORITHM_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

/// Checks a webhook delivery against the shared secret.
///
/// Gates run in order and the first failure rejects: headers present, timestamp within
/// `tolerance_secs` of `now`, then HMAC-SHA256 over `"{timestamp}.{payload}"`.
pub fn verify_signature(
    payload: &[u8],
    signature: Option<&str>,
    timestamp: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let (signature, timestamp) = match (
        signature.map(str::trim).filter(|s| !s.is_empty()),
        timestamp.map(str::trim).filter(|s| !s.is_empty()),
    ) {
        (Some(signature), Some(timestamp)) => (signature, timestamp),
        _ => return Err(LedgerError::SignatureInvalid("missing signature or timestamp header")),
    };

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| LedgerError::SignatureInvalid("invalid timestamp"))?;
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.timestamp().abs_diff(ts) > tolerance {
        return Err(LedgerError::SignatureInvalid("timestamp outside tolerance window"));
    }

    let hex_signature = signature.strip_prefix(ALGORITHM_PREFIX).unwrap_or(signature);
    let provided = hex::decode(hex_signature)
        .map_err(|_| LedgerError::SignatureInvalid("invalid signature hex"))?;

    // verify_slice compares in constant time.
    mac_for(timestamp, payload, secret)?
        .verify_slice(&provided)
        .map_err(|_| LedgerError::SignatureInvalid("signature mismatch"))
}

/// Produces the `X-Webhook-Signature` value a provider would send.
pub fn sign(payload: &[u8], timestamp: &str, secret: &str) -> Result<String> {
    let digest = mac_for(timestamp, payload, secret)?.finalize().into_bytes();
    Ok(format!("{ALGORITHM_PREFIX}{}", hex::encode(digest)))
}

fn mac_for(timestamp: &str, payload: &[u8], secret: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| LedgerError::Config("invalid webhook secret".to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}
