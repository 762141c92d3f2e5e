//! API models for schedule administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::schedules::Schedule;
use crate::types::ScheduleId;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScheduleCreate {
    pub name: String,
    pub job_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// Standard 5-field cron expression
    pub cron_expr: String,
    /// IANA timezone name (default: UTC)
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ScheduleUpdate {
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub cron_expr: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScheduleResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ScheduleId,
    pub name: String,
    pub job_type: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub cron_expr: String,
    pub timezone: String,
    pub enabled: bool,
    pub max_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Schedule> for ScheduleResponse {
    fn from(schedule: Schedule) -> Self {
        Self {
            id: schedule.id,
            name: schedule.name,
            job_type: schedule.job_type,
            payload: schedule.payload,
            cron_expr: schedule.cron_expr,
            timezone: schedule.timezone,
            enabled: schedule.enabled,
            max_attempts: schedule.max_attempts,
            next_run_at: schedule.next_run_at,
            last_run_at: schedule.last_run_at,
            created_at: schedule.created_at,
            updated_at: schedule.updated_at,
        }
    }
}
