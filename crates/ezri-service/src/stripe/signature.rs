//! `Stripe-Signature` header verification.

use crate::crypto::{constant_time_eq, hmac_sha256_hex};

use super::StripeError;

/// Maximum age of a signed payload, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verify `header` (`t=<ts>,v1=<sig>[,v1=<sig>...]`) against `payload`.
///
/// The signed message is `"{t}.{payload}"`. Any `v1` entry may match.
/// Payloads signed more than `tolerance_secs` away from `now_ts` are
/// rejected.
///
/// # Errors
///
/// Returns `StripeError::InvalidSignature` on a malformed header, a stale
/// timestamp, or no matching signature.
pub fn verify_signature(
    secret: &str,
    payload: &str,
    header: &str,
    now_ts: i64,
    tolerance_secs: i64,
) -> Result<(), StripeError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(StripeError::InvalidSignature)?;
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| StripeError::InvalidSignature)?;

    if signatures.is_empty() || now_ts.abs_diff(ts) > tolerance_secs.unsigned_abs() {
        return Err(StripeError::InvalidSignature);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .map_err(|e| StripeError::Configuration(e.to_string()))?;

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(StripeError::InvalidSignature)
    }
}

/// Build a signature header for `payload` at `ts`.
///
/// # Errors
///
/// Returns `StripeError::Configuration` if the secret is rejected.
pub fn sign(secret: &str, payload: &str, ts: i64) -> Result<String, StripeError> {
    let sig = hmac_sha256_hex(secret, &format!("{ts}.{payload}"))
        .map_err(|e| StripeError::Configuration(e.to_string()))?;
    Ok(format!("t={ts},v1={sig}"))
}
