//! Database models for the durable job queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{JobId, ScheduleId};

/// Job lifecycle state. `queued → running → (completed | failed | canceled)`,
/// with `failed` returning to `queued` while attempts remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Canceled)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "canceled" => Ok(JobState::Canceled),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Database model for a job row.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: JobId,
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: String,
    pub run_at: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub schedule_id: Option<ScheduleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn job_state(&self) -> JobState {
        self.state.parse().unwrap_or(JobState::Queued)
    }
}

/// Request to enqueue a job.
#[derive(Debug, Clone)]
pub struct JobCreateDBRequest {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub run_at: Option<DateTime<Utc>>,
    pub max_attempts: i32,
    pub idempotency_key: Option<String>,
    pub schedule_id: Option<ScheduleId>,
}

/// Result of an enqueue that may have hit an idempotency collision.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A new job row was created.
    Created(Job),
    /// A non-terminal job with the same idempotency key already exists.
    Duplicate(JobId),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            EnqueueOutcome::Created(job) => job.id,
            EnqueueOutcome::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// Queue gauge snapshot: counts per state and oldest-queued age.
#[derive(Debug, Clone, FromRow, Serialize, utoipa::ToSchema)]
pub struct JobStats {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub canceled: i64,
    /// Seconds the oldest still-queued job has been waiting
    pub oldest_queued_secs: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_terminal() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
    }

    #[test]
    fn states_round_trip_through_str() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Canceled,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }
}
