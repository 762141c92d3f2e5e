//! Repository for the durable job queue.
//!
//! The queue's correctness lives in these statements: claiming uses
//! `SELECT ... FOR UPDATE SKIP LOCKED` so concurrent workers never hand out
//! the same job, and every state transition is guarded by the expected
//! current state so late writers (expired leases, canceled jobs) silently
//! lose instead of resurrecting finished work.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::{DbError, Result};
use crate::db::models::jobs::{EnqueueOutcome, Job, JobCreateDBRequest, JobState, JobStats};
use crate::types::{abbrev_uuid, JobId};

pub struct Jobs<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Jobs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Enqueue a job. A non-terminal job with the same idempotency key makes
    /// this a no-op returning the existing job id.
    #[instrument(skip(self, request), fields(job_type = %request.job_type), err)]
    pub async fn enqueue(&mut self, request: &JobCreateDBRequest) -> Result<EnqueueOutcome> {
        // Two passes: the insert can lose the idempotency race, and the
        // follow-up lookup can miss if the colliding job reached a terminal
        // state in between. One retry covers both.
        for _ in 0..2 {
            let inserted = sqlx::query_as::<_, Job>(
                r#"
                INSERT INTO _ayb_jobs (type, payload, run_at, max_attempts, idempotency_key, schedule_id)
                VALUES ($1, $2, COALESCE($3, now()), $4, $5, $6)
                ON CONFLICT (idempotency_key)
                    WHERE idempotency_key IS NOT NULL AND state IN ('queued', 'running')
                    DO NOTHING
                RETURNING *
                "#,
            )
            .bind(&request.job_type)
            .bind(&request.payload)
            .bind(request.run_at)
            .bind(request.max_attempts)
            .bind(&request.idempotency_key)
            .bind(request.schedule_id)
            .fetch_optional(&mut *self.db)
            .await?;

            if let Some(job) = inserted {
                return Ok(EnqueueOutcome::Created(job));
            }

            let existing = sqlx::query_scalar::<_, JobId>(
                "SELECT id FROM _ayb_jobs WHERE idempotency_key = $1 AND state IN ('queued', 'running')",
            )
            .bind(&request.idempotency_key)
            .fetch_optional(&mut *self.db)
            .await?;

            if let Some(id) = existing {
                return Ok(EnqueueOutcome::Duplicate(id));
            }
        }
        Err(DbError::Other(anyhow::anyhow!(
            "could not enqueue job of type {} after idempotency race",
            request.job_type
        )))
    }

    /// Claim up to `limit` ready jobs for `worker_id`, leasing them for
    /// `lease_secs`. Attempt counting happens here so a crash mid-run still
    /// consumes an attempt.
    #[instrument(skip(self), err)]
    pub async fn claim(&mut self, worker_id: &str, limit: i64, lease_secs: f64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH ready AS (
                SELECT id FROM _ayb_jobs
                WHERE state = 'queued' AND run_at <= now()
                ORDER BY run_at ASC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE _ayb_jobs j
            SET state = 'running',
                worker_id = $2,
                lease_until = now() + make_interval(secs => $3),
                attempts = j.attempts + 1,
                last_run_at = now(),
                updated_at = now()
            FROM ready
            WHERE j.id = ready.id
            RETURNING j.*
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .bind(lease_secs)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(jobs)
    }

    /// Extend the lease of a running job. Affects nothing if the job was
    /// swept or canceled in the meantime.
    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&id)), err)]
    pub async fn renew_lease(&mut self, id: JobId, worker_id: &str, lease_secs: f64) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE _ayb_jobs
            SET lease_until = now() + make_interval(secs => $3), updated_at = now()
            WHERE id = $1 AND worker_id = $2 AND state = 'running'
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(lease_secs)
        .execute(&mut *self.db)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&id)), err)]
    pub async fn complete(&mut self, id: JobId) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE _ayb_jobs
            SET state = 'completed', completed_at = now(), lease_until = NULL, worker_id = NULL,
                last_error = NULL, updated_at = now()
            WHERE id = $1 AND state = 'running'
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Requeue a failed attempt with a backoff delay.
    #[instrument(skip(self, error), fields(job_id = %abbrev_uuid(&id)), err)]
    pub async fn retry_later(&mut self, id: JobId, error: &str, delay_secs: f64) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE _ayb_jobs
            SET state = 'queued', run_at = now() + make_interval(secs => $3), last_error = $2,
                lease_until = NULL, worker_id = NULL, updated_at = now()
            WHERE id = $1 AND state = 'running'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(delay_secs)
        .execute(&mut *self.db)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Terminal failure: attempts exhausted or the handler marked the error
    /// permanent.
    #[instrument(skip(self, error), fields(job_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_failed(&mut self, id: JobId, error: &str) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE _ayb_jobs
            SET state = 'failed', last_error = $2, lease_until = NULL, worker_id = NULL, updated_at = now()
            WHERE id = $1 AND state = 'running'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&mut *self.db)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Cancel a job that has not reached a terminal state.
    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&id)), err)]
    pub async fn cancel(&mut self, id: JobId) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE _ayb_jobs
            SET state = 'canceled', canceled_at = now(), lease_until = NULL, worker_id = NULL, updated_at = now()
            WHERE id = $1 AND state IN ('queued', 'running')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(job)
    }

    /// Requeue a failed or canceled job from scratch.
    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&id)), err)]
    pub async fn retry(&mut self, id: JobId) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE _ayb_jobs
            SET state = 'queued', attempts = 0, run_at = now(), last_error = NULL,
                completed_at = NULL, canceled_at = NULL, updated_at = now()
            WHERE id = $1 AND state IN ('failed', 'canceled')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(job)
    }

    /// Return expired-lease jobs to the queue; exhausted ones go terminal.
    /// The crashed attempt was counted at claim time.
    #[instrument(skip(self), err)]
    pub async fn sweep_expired(&mut self) -> Result<u64> {
        let done = sqlx::query(
            r#"
            UPDATE _ayb_jobs
            SET state = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'queued' END,
                last_error = 'lease expired',
                lease_until = NULL, worker_id = NULL, updated_at = now()
            WHERE state = 'running' AND lease_until < now()
            "#,
        )
        .execute(&mut *self.db)
        .await?;
        Ok(done.rows_affected())
    }

    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, id: JobId) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM _ayb_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(job)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self, state: Option<JobState>, job_type: Option<&str>, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM _ayb_jobs
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::text IS NULL OR type = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(state.map(|s| s.as_str()))
        .bind(job_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(jobs)
    }

    #[instrument(skip(self), err)]
    pub async fn stats(&mut self) -> Result<JobStats> {
        let stats = sqlx::query_as::<_, JobStats>(
            r#"
            SELECT count(*) FILTER (WHERE state = 'queued') AS queued,
                   count(*) FILTER (WHERE state = 'running') AS running,
                   count(*) FILTER (WHERE state = 'completed') AS completed,
                   count(*) FILTER (WHERE state = 'failed') AS failed,
                   count(*) FILTER (WHERE state = 'canceled') AS canceled,
                   EXTRACT(EPOCH FROM (now() - min(created_at) FILTER (WHERE state = 'queued')))::int8 AS oldest_queued_secs
            FROM _ayb_jobs
            "#,
        )
        .fetch_one(&mut *self.db)
        .await?;
        Ok(stats)
    }
}
