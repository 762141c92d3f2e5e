//! Repository for cron schedules.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::schedules::{Schedule, ScheduleCreateDBRequest, ScheduleUpdateDBRequest};
use crate::types::{abbrev_uuid, ScheduleId};

pub struct Schedules<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Schedules<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    pub async fn create(&mut self, request: &ScheduleCreateDBRequest) -> Result<Schedule> {
        let schedule = sqlx::query_as::<_, Schedule>(
            r#"
            INSERT INTO _ayb_schedules (name, job_type, payload, cron_expr, timezone, enabled, max_attempts, next_run_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&request.name)
        .bind(&request.job_type)
        .bind(&request.payload)
        .bind(&request.cron_expr)
        .bind(&request.timezone)
        .bind(request.enabled)
        .bind(request.max_attempts)
        .bind(request.next_run_at)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(schedule)
    }

    #[instrument(skip(self), fields(schedule_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, id: ScheduleId) -> Result<Option<Schedule>> {
        let schedule = sqlx::query_as::<_, Schedule>("SELECT * FROM _ayb_schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(schedule)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_name(&mut self, name: &str) -> Result<Option<Schedule>> {
        let schedule = sqlx::query_as::<_, Schedule>("SELECT * FROM _ayb_schedules WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(schedule)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<Schedule>> {
        let schedules = sqlx::query_as::<_, Schedule>("SELECT * FROM _ayb_schedules ORDER BY name")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(schedules)
    }

    #[instrument(skip(self), err)]
    pub async fn list_enabled(&mut self) -> Result<Vec<Schedule>> {
        let schedules = sqlx::query_as::<_, Schedule>("SELECT * FROM _ayb_schedules WHERE enabled = true ORDER BY name")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(schedules)
    }

    #[instrument(skip(self, request), fields(schedule_id = %abbrev_uuid(&id)), err)]
    pub async fn update(&mut self, id: ScheduleId, request: &ScheduleUpdateDBRequest) -> Result<Option<Schedule>> {
        let schedule = sqlx::query_as::<_, Schedule>(
            r#"
            UPDATE _ayb_schedules
            SET job_type = COALESCE($2, job_type),
                payload = COALESCE($3, payload),
                cron_expr = COALESCE($4, cron_expr),
                timezone = COALESCE($5, timezone),
                enabled = COALESCE($6, enabled),
                max_attempts = COALESCE($7, max_attempts),
                next_run_at = CASE WHEN $8::boolean THEN $9 ELSE next_run_at END,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.job_type)
        .bind(&request.payload)
        .bind(&request.cron_expr)
        .bind(&request.timezone)
        .bind(request.enabled)
        .bind(request.max_attempts)
        .bind(request.next_run_at.is_some())
        .bind(request.next_run_at.flatten())
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(schedule)
    }

    /// Stamp a fire: record `last_run_at` and the recomputed `next_run_at`.
    #[instrument(skip(self), fields(schedule_id = %abbrev_uuid(&id)), err)]
    pub async fn record_fire(&mut self, id: ScheduleId, fired_at: DateTime<Utc>, next_run_at: Option<DateTime<Utc>>) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE _ayb_schedules
            SET last_run_at = $2, next_run_at = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(fired_at)
        .bind(next_run_at)
        .execute(&mut *self.db)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(schedule_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: ScheduleId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM _ayb_schedules WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
