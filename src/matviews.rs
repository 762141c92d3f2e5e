//! Materialized view refresher.
//!
//! Refreshes run serialized per view through a PostgreSQL advisory lock keyed
//! by `hashtext('schema.view')`. Lock, refresh and unlock all execute on the
//! same pinned connection — an advisory lock taken on one pool connection
//! cannot be released from another. The whole sequence runs inside a spawned
//! task so a caller disconnecting mid-refresh can never skip the unlock.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::instrument;

use crate::db::errors::DbError;
use crate::db::handlers::changelog::is_valid_identifier;
use crate::db::handlers::Matviews;
use crate::db::models::matviews::{MatviewCreateDBRequest, MatviewRegistration, RefreshMode};
use crate::errors::{Error, Result};
use crate::jobs::{JobContext, JobError, JobHandler};
use crate::types::MatviewId;

/// Job type for queue-driven refreshes.
pub const MATVIEW_REFRESH_JOB: &str = "materialized_view_refresh";

/// Build the refresh statement. Pure in `(schema, view, mode)`; identifiers
/// are validated and double-quoted, so the output stays within
/// `[A-Za-z0-9_" .]` plus the keyword spelling.
pub fn build_refresh_sql(schema: &str, view: &str, mode: RefreshMode) -> Result<String> {
    if !is_valid_identifier(schema) {
        return Err(Error::bad_field(format!("invalid schema name {schema}"), "schema_name"));
    }
    if !is_valid_identifier(view) {
        return Err(Error::bad_field(format!("invalid view name {view}"), "view_name"));
    }
    let concurrently = match mode {
        RefreshMode::Standard => "",
        RefreshMode::Concurrent => "CONCURRENTLY ",
    };
    Ok(format!("REFRESH MATERIALIZED VIEW {concurrently}\"{schema}\".\"{view}\""))
}

/// Advisory lock key: text hashed server-side with `hashtext`.
fn lock_key(schema: &str, view: &str) -> String {
    format!("{schema}.{view}")
}

#[derive(Clone)]
pub struct MatviewService {
    pool: PgPool,
}

impl MatviewService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Refresh a registered view now, serialized against concurrent callers.
    ///
    /// Returns the updated registration. `RefreshInProgress` (412) when
    /// another refresh holds the lock; precondition failures are recorded on
    /// the registration row as errors.
    #[instrument(skip(self), err)]
    pub async fn refresh_now(&self, id: MatviewId) -> Result<MatviewRegistration> {
        let registration = {
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            Matviews::new(&mut conn)
                .get(id)
                .await?
                .ok_or_else(|| Error::not_found("matview registration", id))?
        };

        // The refresh owns its own task: caller cancellation must not be able
        // to abandon the advisory lock between acquire and release.
        let pool = self.pool.clone();
        let outcome = tokio::spawn(run_refresh(pool, registration))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("join matview refresh task: {e}"),
            })?;
        outcome?;

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Matviews::new(&mut conn)
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("matview registration", id))
    }

    /// Find a registration by name, creating a `standard`-mode one when
    /// absent. Retries the lookup if a concurrent creator wins the race.
    #[instrument(skip(self), err)]
    pub async fn ensure_registration(&self, schema: &str, view: &str) -> Result<MatviewRegistration> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let mut repo = Matviews::new(&mut conn);

        if let Some(existing) = repo.get_by_name(schema, view).await? {
            return Ok(existing);
        }

        match repo
            .create(&MatviewCreateDBRequest {
                schema_name: schema.to_string(),
                view_name: view.to_string(),
                refresh_mode: RefreshMode::Standard,
            })
            .await
        {
            Ok(created) => Ok(created),
            Err(DbError::UniqueViolation { .. }) => repo
                .get_by_name(schema, view)
                .await?
                .ok_or_else(|| Error::not_found("matview registration", format!("{schema}.{view}"))),
            Err(e) => Err(e.into()),
        }
    }
}

/// The serialized part: validate against the catalogs, take the advisory
/// lock, refresh, release, record.
async fn run_refresh(pool: PgPool, registration: MatviewRegistration) -> Result<()> {
    let mode = registration.mode();
    let schema = registration.schema_name.clone();
    let view = registration.view_name.clone();
    let sql = build_refresh_sql(&schema, &view, mode)?;

    // Everything below happens on this one pinned connection.
    let mut conn = pool.acquire().await.map_err(DbError::from)?;

    let catalog = Matviews::new(&mut conn).catalog_info(&schema, &view).await?;
    let catalog = match catalog {
        Some(info) if info.is_matview => info,
        _ => {
            let message = format!("{schema}.{view} is not a materialized view");
            record(&pool, registration.id, 0, Some(&message)).await;
            return Err(Error::precondition("NotMaterializedView", message));
        }
    };

    if mode == RefreshMode::Concurrent {
        if !catalog.populated {
            let message = format!("{schema}.{view} must be populated before a concurrent refresh");
            record(&pool, registration.id, 0, Some(&message)).await;
            return Err(Error::precondition("ConcurrentRefreshRequiresPopulated", message));
        }
        let has_index = Matviews::new(&mut conn).has_concurrent_refresh_index(&schema, &view).await?;
        if !has_index {
            let message = format!("{schema}.{view} needs a unique, non-partial, non-expression index for concurrent refresh");
            record(&pool, registration.id, 0, Some(&message)).await;
            return Err(Error::precondition("ConcurrentRefreshRequiresIndex", message));
        }
    }

    let key = lock_key(&schema, &view);
    let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
        .bind(&key)
        .fetch_one(&mut *conn)
        .await
        .map_err(DbError::from)?;
    if !locked {
        return Err(Error::precondition(
            "RefreshInProgress",
            format!("a refresh of {schema}.{view} is already running"),
        ));
    }

    let started = Instant::now();
    let refresh_result = sqlx::query(&sql).execute(&mut *conn).await;
    let duration_ms = started.elapsed().as_millis() as i64;

    // Unlock on the same connection, before surfacing any refresh error.
    let unlock: std::result::Result<bool, sqlx::Error> = sqlx::query_scalar("SELECT pg_advisory_unlock(hashtext($1))")
        .bind(&key)
        .fetch_one(&mut *conn)
        .await;
    match unlock {
        Ok(true) => {}
        Ok(false) => tracing::warn!(view = %key, "Advisory unlock found no lock held"),
        // The connection dies with the lock: PostgreSQL releases advisory
        // locks on disconnect, so dropping the broken connection is the
        // recovery path.
        Err(e) => tracing::warn!(view = %key, error = %e, "Advisory unlock failed; dropping connection"),
    }
    drop(conn);

    match refresh_result {
        Ok(_) => {
            tracing::info!(view = %key, duration_ms, "Materialized view refreshed");
            record(&pool, registration.id, duration_ms, None).await;
            Ok(())
        }
        Err(e) => {
            let db_error = DbError::from(e);
            let message = format!("refresh failed: {db_error}");
            tracing::warn!(view = %key, duration_ms, error = %db_error, "Materialized view refresh failed");
            record(&pool, registration.id, duration_ms, Some(&message)).await;
            Err(Error::Database(db_error))
        }
    }
}

async fn record(pool: &PgPool, id: MatviewId, duration_ms: i64, error: Option<&str>) {
    let Ok(mut conn) = pool.acquire().await else {
        tracing::warn!(matview_id = %id, "Could not acquire connection to record refresh outcome");
        return;
    };
    if let Err(e) = Matviews::new(&mut conn).record_refresh(id, duration_ms, error).await {
        tracing::warn!(matview_id = %id, error = %e, "Failed to record refresh outcome");
    }
}

/// Payload of a `materialized_view_refresh` job.
#[derive(Debug, Deserialize)]
struct RefreshJobPayload {
    #[serde(default)]
    schema: Option<String>,
    view_name: String,
}

/// Queue handler wiring scheduled refreshes through the service.
pub struct MatviewRefreshHandler {
    service: Arc<MatviewService>,
}

impl MatviewRefreshHandler {
    pub fn new(service: Arc<MatviewService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for MatviewRefreshHandler {
    fn job_type(&self) -> &'static str {
        MATVIEW_REFRESH_JOB
    }

    async fn run(&self, _ctx: &JobContext, payload: serde_json::Value) -> std::result::Result<(), JobError> {
        let payload: RefreshJobPayload =
            serde_json::from_value(payload).map_err(|e| JobError::permanent(anyhow::anyhow!("bad refresh payload: {e}")))?;
        let schema = payload.schema.as_deref().unwrap_or("public");

        let registration = self
            .service
            .ensure_registration(schema, &payload.view_name)
            .await
            .map_err(|e| JobError::retryable(anyhow::anyhow!("resolve registration: {e}")))?;

        match self.service.refresh_now(registration.id).await {
            Ok(_) => Ok(()),
            // Another caller is refreshing right now; come back later.
            Err(Error::PreconditionFailed { code, message }) if code.as_deref() == Some("RefreshInProgress") => {
                Err(JobError::retryable(anyhow::anyhow!(message)))
            }
            // Structural problems do not fix themselves by retrying.
            Err(e @ Error::PreconditionFailed { .. }) | Err(e @ Error::BadRequest { .. }) => {
                Err(JobError::permanent(anyhow::anyhow!(e.to_string())))
            }
            Err(e) => Err(JobError::retryable(anyhow::anyhow!(e.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_sql_is_pure_and_quoted() {
        let standard = build_refresh_sql("public", "leaderboard", RefreshMode::Standard).unwrap();
        assert_eq!(standard, "REFRESH MATERIALIZED VIEW \"public\".\"leaderboard\"");

        let concurrent = build_refresh_sql("public", "leaderboard", RefreshMode::Concurrent).unwrap();
        assert_eq!(concurrent, "REFRESH MATERIALIZED VIEW CONCURRENTLY \"public\".\"leaderboard\"");

        // Same inputs, same output.
        assert_eq!(
            build_refresh_sql("public", "leaderboard", RefreshMode::Concurrent).unwrap(),
            concurrent
        );
    }

    #[test]
    fn refresh_sql_stays_within_the_safe_charset() {
        let sql = build_refresh_sql("analytics", "daily_rollup_v2", RefreshMode::Concurrent).unwrap();
        assert!(sql
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '"' | ' ' | '.')));
    }

    #[test]
    fn malicious_identifiers_never_reach_sql() {
        assert!(build_refresh_sql("public", "x\"; DROP TABLE y; --", RefreshMode::Standard).is_err());
        assert!(build_refresh_sql("bad schema", "view", RefreshMode::Standard).is_err());
        assert!(build_refresh_sql("public", "", RefreshMode::Standard).is_err());
        assert!(build_refresh_sql("public", "1view", RefreshMode::Standard).is_err());
    }

    #[test]
    fn lock_keys_are_per_view() {
        assert_eq!(lock_key("public", "a"), "public.a");
        assert_ne!(lock_key("public", "a"), lock_key("public", "b"));
        assert_ne!(lock_key("s1", "a"), lock_key("s2", "a"));
    }
}
