//! API models for materialized view administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::matviews::{MatviewRegistration, RefreshMode};
use crate::types::MatviewId;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MatviewCreate {
    #[serde(default = "default_schema")]
    pub schema_name: String,
    pub view_name: String,
    #[serde(default = "default_mode")]
    pub refresh_mode: RefreshMode,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_mode() -> RefreshMode {
    RefreshMode::Standard
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct MatviewUpdate {
    #[serde(default)]
    pub refresh_mode: Option<RefreshMode>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatviewResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MatviewId,
    pub schema_name: String,
    pub view_name: String,
    pub refresh_mode: RefreshMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MatviewRegistration> for MatviewResponse {
    fn from(registration: MatviewRegistration) -> Self {
        Self {
            refresh_mode: registration.mode(),
            id: registration.id,
            schema_name: registration.schema_name,
            view_name: registration.view_name,
            last_refresh_at: registration.last_refresh_at,
            duration_ms: registration.last_refresh_duration_ms,
            last_refresh_status: registration.last_refresh_status,
            last_refresh_error: registration.last_refresh_error,
            created_at: registration.created_at,
            updated_at: registration.updated_at,
        }
    }
}
