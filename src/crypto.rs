//! Secret generation and HMAC helpers shared by webhooks, storage signed URLs
//! and API keys.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Prefix for generated API keys.
pub const API_KEY_PREFIX: &str = "ayb_";

/// Generate a random 32-byte secret as lowercase hex.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Generate an opaque API key: `ayb_` + url-safe base64 of 32 random bytes.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, BASE64_URL.encode(bytes))
}

/// SHA-256 digest of an API key, hex encoded. Keys are stored hashed; lookup
/// recomputes the digest over the presented key.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Hex-encoded HMAC-SHA256 of `message` under `secret`.
pub fn hmac_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    hex_encode(&mac.finalize().into_bytes())
}

/// Constant-time comparison of a hex signature against the expected HMAC.
pub fn hmac_verify(secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(provided) = hex_decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(message);
    mac.verify_slice(&provided).is_ok()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_64_hex_chars() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn api_keys_carry_the_prefix_and_hash_deterministically() {
        let key = generate_api_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(hash_api_key(&key), hash_api_key(&key));
        assert_ne!(hash_api_key(&key), hash_api_key("ayb_other"));
    }

    #[test]
    fn hmac_hex_is_deterministic_and_verifiable() {
        let sig = hmac_hex(b"secret", b"payload");
        assert_eq!(sig, hmac_hex(b"secret", b"payload"));
        assert_eq!(sig.len(), 64);
        assert!(hmac_verify(b"secret", b"payload", &sig));
        assert!(!hmac_verify(b"secret", b"tampered", &sig));
        assert!(!hmac_verify(b"other", b"payload", &sig));
        assert!(!hmac_verify(b"secret", b"payload", "zz"));
    }

    #[test]
    fn hex_round_trip() {
        let bytes = [0u8, 1, 0xab, 0xff];
        assert_eq!(hex_decode(&hex_encode(&bytes)).unwrap(), bytes);
    }
}
