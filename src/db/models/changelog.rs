//! Database model for rows in the change log.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ChangeRow {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub action: String,
    pub schema_name: String,
    pub table_name: String,
    pub record: Option<serde_json::Value>,
    pub old_record: Option<serde_json::Value>,
}
