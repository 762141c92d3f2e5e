//! Database models for cron schedules.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::ScheduleId;

#[derive(Debug, Clone, FromRow)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub cron_expr: String,
    pub timezone: String,
    pub enabled: bool,
    pub max_attempts: i32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScheduleCreateDBRequest {
    pub name: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub cron_expr: String,
    pub timezone: String,
    pub enabled: bool,
    pub max_attempts: i32,
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdateDBRequest {
    pub job_type: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub cron_expr: Option<String>,
    pub timezone: Option<String>,
    pub enabled: Option<bool>,
    pub max_attempts: Option<i32>,
    pub next_run_at: Option<Option<DateTime<Utc>>>,
}
