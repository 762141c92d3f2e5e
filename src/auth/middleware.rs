//! Request identity resolution.
//!
//! Credentials are tried in priority order: `X-API-Key`, then
//! `Authorization: Bearer` (static admin token, admin session token, user
//! JWT). Presenting an invalid credential is a 401 — it never silently
//! degrades to anonymous. With authentication disabled in config, bare
//! requests resolve to admin, which is the local-development mode.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::token;
use crate::crypto;
use crate::db::errors::DbError;
use crate::db::handlers::ApiKeys;
use crate::errors::Error;
use crate::session::Identity;
use crate::AppState;

/// Identity plus whether it may reach the admin plane.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    pub admin: bool,
}

pub async fn resolve_identity(state: &AppState, parts: &Parts) -> Result<ResolvedIdentity, Error> {
    // API keys first: service automation should not be affected by cookies
    // or stale bearer tokens a client also sends.
    if let Some(presented) = parts.headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let hash = crypto::hash_api_key(presented);
        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        let key = ApiKeys::new(&mut conn).authenticate(&hash).await?;
        let Some(key) = key else {
            return Err(Error::Unauthenticated {
                message: Some("unknown API key".to_string()),
            });
        };
        let admin = key.scope == "service";
        return Ok(ResolvedIdentity {
            identity: Identity::service(key.app_id),
            admin,
        });
    }

    if let Some(bearer) = bearer_token(parts) {
        if state.auth.verify_admin_bearer(bearer) {
            return Ok(ResolvedIdentity {
                identity: Identity::admin(None),
                admin: true,
            });
        }
        if let Some(secret) = state.auth.jwt_secret() {
            if let Some(user_id) = token::verify_user_token(secret.as_bytes(), bearer) {
                return Ok(ResolvedIdentity {
                    identity: Identity::user(user_id),
                    admin: false,
                });
            }
        }
        return Err(Error::Unauthenticated {
            message: Some("invalid bearer token".to_string()),
        });
    }

    if !state.auth.auth_enabled() {
        return Ok(ResolvedIdentity {
            identity: Identity::admin(None),
            admin: true,
        });
    }

    Ok(ResolvedIdentity {
        identity: Identity::anon(),
        admin: false,
    })
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Extractor: whoever the request is, including anonymous.
pub struct CurrentIdentity(pub Identity);

impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let resolved = resolve_identity(state, parts).await?;
        Ok(CurrentIdentity(resolved.identity))
    }
}

/// Extractor: admin plane only. 401 for anonymous, 403 for authenticated
/// subjects without admin capability.
pub struct RequireAdmin(pub Identity);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let resolved = resolve_identity(state, parts).await?;
        if resolved.admin {
            return Ok(RequireAdmin(resolved.identity));
        }
        if matches!(resolved.identity.role, crate::types::Role::Anon) {
            Err(Error::unauthenticated())
        } else {
            Err(Error::forbidden("admin access required"))
        }
    }
}
