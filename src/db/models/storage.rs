//! Database models for stored object metadata.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::StorageObjectId;

#[derive(Debug, Clone, FromRow)]
pub struct StorageObject {
    pub id: StorageObjectId,
    pub bucket: String,
    pub name: String,
    pub size: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StorageObjectCreateDBRequest {
    pub bucket: String,
    pub name: String,
    pub size: i64,
    pub content_type: String,
}
