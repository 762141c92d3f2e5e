//! Bearer tokens: short-lived admin session JWTs and verification of
//! user-issued JWTs.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::types::UserId;

/// Subject of admin session tokens.
const ADMIN_SUBJECT: &str = "ayb-admin";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issue an admin session token valid for `ttl`.
pub fn issue_admin_token(secret: &[u8], ttl: std::time::Duration) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: ADMIN_SUBJECT.to_string(),
        iat: now,
        exp: now + ttl.as_secs() as i64,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).map_err(|e| Error::Internal {
        operation: format!("sign session token: {e}"),
    })
}

/// Verify an admin session token: signature, expiry and subject.
pub fn verify_admin_token(secret: &[u8], token: &str) -> bool {
    let validation = Validation::new(Algorithm::HS256);
    match decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation) {
        Ok(data) => data.claims.sub == ADMIN_SUBJECT,
        Err(_) => false,
    }
}

/// Verify a user JWT and extract the subject user id.
pub fn verify_user_token(secret: &[u8], token: &str) -> Option<UserId> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation).ok()?;
    if data.claims.sub == ADMIN_SUBJECT {
        return None;
    }
    data.claims.sub.parse().ok()
}

/// Issue a user JWT; used by tests and by external auth flows that share the
/// configured secret.
pub fn issue_user_token(secret: &[u8], user_id: UserId, ttl: std::time::Duration) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ttl.as_secs() as i64,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).map_err(|e| Error::Internal {
        operation: format!("sign user token: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn admin_tokens_round_trip() {
        let token = issue_admin_token(b"secret", Duration::from_secs(60)).unwrap();
        assert!(verify_admin_token(b"secret", &token));
        assert!(!verify_admin_token(b"other", &token));
        assert!(!verify_admin_token(b"secret", "garbage"));
    }

    #[test]
    fn expired_admin_tokens_are_rejected() {
        let token = issue_admin_token(b"secret", Duration::ZERO).unwrap();
        // Default validation applies a small leeway; shift well past it.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let outcome = decode::<Claims>(&token, &DecodingKey::from_secret(b"secret"), &validation);
        assert!(outcome.is_err());
    }

    #[test]
    fn user_tokens_carry_the_user_id() {
        let user_id = uuid::Uuid::new_v4();
        let token = issue_user_token(b"secret", user_id, Duration::from_secs(60)).unwrap();
        assert_eq!(verify_user_token(b"secret", &token), Some(user_id));
        assert_eq!(verify_user_token(b"wrong", &token), None);
    }

    #[test]
    fn admin_tokens_do_not_pass_as_user_tokens() {
        let token = issue_admin_token(b"secret", Duration::from_secs(60)).unwrap();
        assert_eq!(verify_user_token(b"secret", &token), None);
    }
}
