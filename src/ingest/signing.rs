// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! SDK runtime webhook signatures.
//!
//! Payloads are authenticated with HMAC-SHA256 over
//! `"{timestamp}.{nonce}.{body}"`. Verification is constant-time and
//! rejects stale timestamps to blunt replay.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Allowed clock skew between sender and receiver.
pub const TIMESTAMP_SKEW_SECS: i64 = 300;

/// Why a signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Timestamp outside the skew window
    StaleTimestamp,
    /// Timestamp did not parse as an integer
    MalformedTimestamp,
    /// Signature was not valid hex
    MalformedSignature,
    /// HMAC mismatch
    Mismatch,
}

/// Computes the hex signature for a payload.
pub fn sign(secret: &str, timestamp: i64, nonce: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{timestamp}.{nonce}.{body}").as_bytes());
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Verifies the header triple against the body.
///
/// `now_unix` is injected so callers (and tests) control the clock.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    nonce: &str,
    body: &str,
    signature_hex: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MalformedTimestamp)?;
    if (now_unix - ts).abs() > TIMESTAMP_SKEW_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    let expected: Vec<u8> = decode_hex(signature_hex)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("{ts}.{nonce}.{body}").as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, SignatureError> {
    if hex.len() % 2 != 0 {
        return Err(SignatureError::MalformedSignature);
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| SignatureError::MalformedSignature)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";
    const BODY: &str = r#"{"type":"ping"}"#;

    #[test]
    fn test_roundtrip() {
        let now = 1_750_000_000;
        let signature = sign(SECRET, now, "nonce-1", BODY);
        assert!(verify_signature(SECRET, &now.to_string(), "nonce-1", BODY, &signature, now).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = 1_750_000_000;
        let signature = sign("other-secret", now, "nonce-1", BODY);
        assert_eq!(
            verify_signature(SECRET, &now.to_string(), "nonce-1", BODY, &signature, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_tampered_body_rejected() {
        let now = 1_750_000_000;
        let signature = sign(SECRET, now, "nonce-1", BODY);
        assert_eq!(
            verify_signature(
                SECRET,
                &now.to_string(),
                "nonce-1",
                r#"{"type":"tool_execution"}"#,
                &signature,
                now
            ),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let now = 1_750_000_000;
        let old = now - TIMESTAMP_SKEW_SECS - 1;
        let signature = sign(SECRET, old, "nonce-1", BODY);
        assert_eq!(
            verify_signature(SECRET, &old.to_string(), "nonce-1", BODY, &signature, now),
            Err(SignatureError::StaleTimestamp)
        );
    }

    #[test]
    fn test_skew_tolerance_boundary() {
        let now = 1_750_000_000;
        let edge = now - TIMESTAMP_SKEW_SECS;
        let signature = sign(SECRET, edge, "nonce-1", BODY);
        assert!(
            verify_signature(SECRET, &edge.to_string(), "nonce-1", BODY, &signature, now).is_ok()
        );
    }

    #[test]
    fn test_malformed_inputs() {
        let now = 1_750_000_000;
        assert_eq!(
            verify_signature(SECRET, "not-a-number", "n", BODY, "aabb", now),
            Err(SignatureError::MalformedTimestamp)
        );
        assert_eq!(
            verify_signature(SECRET, &now.to_string(), "n", BODY, "xyz", now),
            Err(SignatureError::MalformedSignature)
        );
    }
}
