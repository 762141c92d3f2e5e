//! API models for job administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::jobs::{Job, JobState};
use crate::types::{JobId, ScheduleId};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct JobListParams {
    /// Filter by state
    pub state: Option<JobState>,
    /// Filter by job type
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JobCreate {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub state: JobState,
    pub run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub schedule_id: Option<ScheduleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canceled_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            state: job.job_state(),
            id: job.id,
            job_type: job.job_type,
            payload: job.payload,
            run_at: job.run_at,
            lease_until: job.lease_until,
            worker_id: job.worker_id,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error,
            last_run_at: job.last_run_at,
            idempotency_key: job.idempotency_key,
            schedule_id: job.schedule_id,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            canceled_at: job.canceled_at,
        }
    }
}

/// Enqueue response distinguishing a fresh job from an idempotency hit.
#[derive(Debug, Serialize, ToSchema)]
pub struct EnqueueResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: JobId,
    pub deduplicated: bool,
}
