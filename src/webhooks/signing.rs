//! Webhook request signing.
//!
//! When a webhook has a secret, deliveries carry
//! `X-AYB-Signature: hex(HMAC-SHA256(secret, body))` computed over the exact
//! bytes of the request body, so receivers can verify both origin and
//! integrity with a constant-time comparison.

use crate::crypto;

/// Sign a request body with the webhook secret. Lowercase hex.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    crypto::hmac_hex(secret.as_bytes(), body)
}

/// Receiver-side verification helper, used by tests and documented for
/// webhook consumers.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    crypto::hmac_verify(secret.as_bytes(), body, signature_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_are_deterministic_hex() {
        let body = br#"{"action":"create","table":"votes","record":{},"ts":"2024-01-01T00:00:00Z"}"#;
        let sig1 = sign_body("topsecret", body);
        let sig2 = sign_body("topsecret", body);
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
        assert!(sig1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn verification_round_trips_and_rejects_tampering() {
        let body = b"payload";
        let sig = sign_body("s3cret", body);
        assert!(verify_signature("s3cret", body, &sig));
        assert!(!verify_signature("s3cret", b"payload2", &sig));
        assert!(!verify_signature("other", body, &sig));
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let body = b"same body";
        assert_ne!(sign_body("a", body), sign_body("b", body));
    }
}
