//! Database models for API keys. Secrets are stored as SHA-256 digests; the
//! raw key is shown exactly once at creation.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{ApiKeyId, AppId};

#[derive(Debug, Clone, FromRow)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub name: String,
    pub key_hash: String,
    pub scope: String,
    pub app_id: Option<AppId>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyCreateDBRequest {
    pub name: String,
    pub key_hash: String,
    pub scope: String,
    pub app_id: Option<AppId>,
}
