//! API models for API key administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::api_keys::ApiKey;
use crate::types::{ApiKeyId, AppId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ApiKeyCreate {
    pub name: String,
    /// `app` or `service`
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub app_id: Option<AppId>,
}

fn default_scope() -> String {
    "app".to_string()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiKeyResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApiKeyId,
    pub name: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub app_id: Option<AppId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            scope: key.scope,
            app_id: key.app_id,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
        }
    }
}

/// Create response: the only time the raw key is returned.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiKeyWithSecretResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ApiKeyId,
    pub name: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub app_id: Option<AppId>,
    pub key: String,
    pub created_at: DateTime<Utc>,
}
