//! Database models for registered applications.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::AppId;

#[derive(Debug, Clone, FromRow)]
pub struct App {
    pub id: AppId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AppCreateDBRequest {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppUpdateDBRequest {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
}
