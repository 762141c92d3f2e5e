//! Database models for materialized view registrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::MatviewId;

/// How a registered view is refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    Standard,
    Concurrent,
}

impl RefreshMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshMode::Standard => "standard",
            RefreshMode::Concurrent => "concurrent",
        }
    }
}

impl std::str::FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(RefreshMode::Standard),
            "concurrent" => Ok(RefreshMode::Concurrent),
            other => Err(format!("unknown refresh mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MatviewRegistration {
    pub id: MatviewId,
    pub schema_name: String,
    pub view_name: String,
    pub refresh_mode: String,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_refresh_duration_ms: Option<i64>,
    pub last_refresh_status: Option<String>,
    pub last_refresh_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatviewRegistration {
    pub fn mode(&self) -> RefreshMode {
        self.refresh_mode.parse().unwrap_or(RefreshMode::Standard)
    }
}

#[derive(Debug, Clone)]
pub struct MatviewCreateDBRequest {
    pub schema_name: String,
    pub view_name: String,
    pub refresh_mode: RefreshMode,
}

#[derive(Debug, Clone, Default)]
pub struct MatviewUpdateDBRequest {
    pub refresh_mode: Option<RefreshMode>,
}
