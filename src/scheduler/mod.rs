//! Cron scheduler: one task per enabled schedule.
//!
//! Each task sleeps until the schedule's `next_run_at`, enqueues a job with
//! the schedule stamped in, recomputes the next fire in the schedule's IANA
//! timezone and persists it. There is no global polling loop — admin
//! mutations cancel and respawn the affected task, keyed through a supervisor
//! map. Missed fires while the process was down collapse into a single
//! enqueue on the next start.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::handlers::Schedules;
use crate::db::models::schedules::Schedule;
use crate::jobs::{EnqueueOptions, JobQueue};
use crate::types::ScheduleId;

/// First retry delay after a failed enqueue.
const ENQUEUE_RETRY_BASE: Duration = Duration::from_secs(30);
/// Ceiling for enqueue retries.
const ENQUEUE_RETRY_CAP: Duration = Duration::from_secs(300);

/// Compute the next fire strictly after `after`, interpreting the standard
/// 5-field expression in the given IANA timezone. DST gaps skip the fire and
/// ambiguous (fall-back) times resolve the way the cron library does,
/// stepping in zone-local time.
pub fn next_fire(cron_expr: &str, timezone: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, String> {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("cron expression must have 5 fields, got {}", fields.len()));
    }
    // The cron crate wants a seconds field; pin it to zero.
    let with_seconds = format!("0 {}", fields.join(" "));
    let schedule: cron::Schedule = with_seconds
        .parse()
        .map_err(|e| format!("invalid cron expression: {e}"))?;
    let tz: chrono_tz::Tz = timezone.parse().map_err(|_| format!("unknown timezone: {timezone}"))?;

    Ok(schedule.after(&after.with_timezone(&tz)).next().map(|t| t.with_timezone(&Utc)))
}

/// Validate a cron expression and timezone pair without computing anything.
pub fn validate_schedule_spec(cron_expr: &str, timezone: &str) -> Result<(), String> {
    next_fire(cron_expr, timezone, Utc::now()).map(|_| ())
}

/// Idempotency key for one fire instant: the process can crash between
/// enqueue and bookkeeping and re-enqueue safely on restart.
fn fire_key(id: ScheduleId, fire_at: DateTime<Utc>) -> String {
    format!("sched:{id}:{}", fire_at.timestamp())
}

#[derive(Clone)]
pub struct Scheduler {
    pool: PgPool,
    queue: JobQueue,
    tasks: Arc<RwLock<HashMap<ScheduleId, JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(pool: PgPool, queue: JobQueue) -> Self {
        Self {
            pool,
            queue,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn tasks for every enabled schedule.
    pub async fn initialize(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        let schedules = Schedules::new(&mut conn).list_enabled().await?;
        drop(conn);

        tracing::info!(count = schedules.len(), "Starting schedule tasks");
        for schedule in schedules {
            self.start(schedule.id, shutdown.clone()).await;
        }
        Ok(())
    }

    /// Start (or restart) the task for one schedule.
    pub async fn start(&self, id: ScheduleId, shutdown: CancellationToken) {
        self.stop(id).await;

        let pool = self.pool.clone();
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            run_schedule(pool, queue, id, shutdown).await;
        });

        self.tasks.write().await.insert(id, handle);
        tracing::debug!(schedule_id = %id, "Schedule task started");
    }

    /// Stop the task for one schedule. Idempotent.
    pub async fn stop(&self, id: ScheduleId) {
        if let Some(handle) = self.tasks.write().await.remove(&id) {
            handle.abort();
            tracing::debug!(schedule_id = %id, "Schedule task stopped");
        }
    }

    /// Cancel and recompute after an admin mutation: restart when enabled,
    /// stop when disabled or deleted.
    pub async fn resync(&self, id: ScheduleId, shutdown: CancellationToken) {
        let enabled = {
            let Ok(mut conn) = self.pool.acquire().await else {
                tracing::warn!(schedule_id = %id, "Could not load schedule for resync");
                return;
            };
            match Schedules::new(&mut conn).get(id).await {
                Ok(Some(schedule)) => schedule.enabled,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(schedule_id = %id, error = %e, "Could not load schedule for resync");
                    return;
                }
            }
        };
        if enabled {
            self.start(id, shutdown).await;
        } else {
            self.stop(id).await;
        }
    }

    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.write().await;
        let count = tasks.len();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
        if count > 0 {
            tracing::info!(count, "Stopped schedule tasks");
        }
    }
}

async fn run_schedule(pool: PgPool, queue: JobQueue, id: ScheduleId, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let schedule = match load_schedule(&pool, id).await {
            Ok(Some(s)) if s.enabled => s,
            Ok(_) => {
                tracing::debug!(schedule_id = %id, "Schedule gone or disabled, task exiting");
                break;
            }
            Err(e) => {
                tracing::warn!(schedule_id = %id, error = %e, "Failed to load schedule, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(ENQUEUE_RETRY_BASE) => continue,
                    _ = shutdown.cancelled() => break,
                }
            }
        };

        // Next fire: persisted value when sane, otherwise recomputed from now.
        let now = Utc::now();
        let fire_at = match schedule.next_run_at {
            Some(at) => at,
            None => match next_fire(&schedule.cron_expr, &schedule.timezone, now) {
                Ok(Some(at)) => {
                    persist_next(&pool, id, Some(at)).await;
                    at
                }
                Ok(None) => {
                    tracing::warn!(schedule_id = %id, "Cron expression yields no future fire, task exiting");
                    break;
                }
                Err(e) => {
                    tracing::error!(schedule_id = %id, error = %e, "Invalid schedule spec, task exiting");
                    break;
                }
            },
        };

        if fire_at > now {
            let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        // Enqueue the fire; retry with backoff unless it was an idempotency
        // collision (which counts as done).
        let mut payload = schedule.payload.clone();
        if let Some(object) = payload.as_object_mut() {
            object.insert("schedule_id".to_string(), serde_json::json!(id));
        }
        let mut retry_delay = ENQUEUE_RETRY_BASE;
        loop {
            let opts = EnqueueOptions {
                max_attempts: Some(schedule.max_attempts),
                idempotency_key: Some(fire_key(id, fire_at)),
                schedule_id: Some(id),
                ..EnqueueOptions::default()
            };
            match queue.enqueue(&schedule.job_type, payload.clone(), opts).await {
                Ok(outcome) => {
                    tracing::info!(
                        schedule_id = %id,
                        job_type = %schedule.job_type,
                        job_id = %outcome.job_id(),
                        deduped = !outcome.is_created(),
                        "Schedule fired"
                    );
                    break;
                }
                Err(e) => {
                    tracing::warn!(schedule_id = %id, error = %e, retry_secs = retry_delay.as_secs(), "Schedule enqueue failed");
                    tokio::select! {
                        _ = tokio::time::sleep(retry_delay) => {}
                        _ = shutdown.cancelled() => return,
                    }
                    retry_delay = (retry_delay * 2).min(ENQUEUE_RETRY_CAP);
                }
            }
        }

        // Next fire computes from the later of the fire instant and now, so a
        // long pause produces exactly one enqueue, not a backfill.
        let fired_at = Utc::now();
        let basis = fire_at.max(fired_at);
        let next = match next_fire(&schedule.cron_expr, &schedule.timezone, basis) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(schedule_id = %id, error = %e, "Schedule spec became invalid, task exiting");
                break;
            }
        };
        record_fire(&pool, id, fired_at, next).await;
    }
}

async fn load_schedule(pool: &PgPool, id: ScheduleId) -> crate::db::errors::Result<Option<Schedule>> {
    let mut conn = pool.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Schedules::new(&mut conn).get(id).await
}

async fn persist_next(pool: &PgPool, id: ScheduleId, next: Option<DateTime<Utc>>) {
    let Ok(mut conn) = pool.acquire().await else { return };
    let request = crate::db::models::schedules::ScheduleUpdateDBRequest {
        next_run_at: Some(next),
        ..Default::default()
    };
    if let Err(e) = Schedules::new(&mut conn).update(id, &request).await {
        tracing::warn!(schedule_id = %id, error = %e, "Failed to persist next_run_at");
    }
}

async fn record_fire(pool: &PgPool, id: ScheduleId, fired_at: DateTime<Utc>, next: Option<DateTime<Utc>>) {
    let Ok(mut conn) = pool.acquire().await else { return };
    if let Err(e) = Schedules::new(&mut conn).record_fire(id, fired_at, next).await {
        tracing::warn!(schedule_id = %id, error = %e, "Failed to record schedule fire");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hourly_schedule_steps_to_the_next_top_of_hour() {
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let next = next_fire("0 * * * *", "UTC", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn late_wakeup_enqueues_once_then_skips_to_the_following_hour() {
        // Fire at 13:00 was consumed; recomputing from 13:05 lands on 14:00,
        // never on a second 13:00.
        let woke_late = Utc.with_ymd_and_hms(2024, 3, 1, 13, 5, 0).unwrap();
        let next = next_fire("0 * * * *", "UTC", woke_late).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap());
    }

    #[test]
    fn timezone_is_interpreted_as_iana_local_time() {
        // 09:00 New York = 14:00 UTC in winter (EST, UTC-5).
        let after = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let next = next_fire("0 9 * * *", "America/New_York", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 10, 14, 0, 0).unwrap());

        // Same wall-clock in summer (EDT, UTC-4).
        let after = Utc.with_ymd_and_hms(2024, 7, 10, 0, 0, 0).unwrap();
        let next = next_fire("0 9 * * *", "America/New_York", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 7, 10, 13, 0, 0).unwrap());
    }

    #[test]
    fn spring_forward_gap_skips_the_nonexistent_fire() {
        // 2024-03-10 02:30 does not exist in New York; the next 02:30 fire
        // lands on the following day.
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let next = next_fire("30 2 * * *", "America/New_York", after).unwrap().unwrap();
        let local = next.with_timezone(&chrono_tz::America::New_York);
        assert_eq!(local.format("%Y-%m-%d %H:%M").to_string(), "2024-03-11 02:30");
    }

    #[test]
    fn five_field_expressions_are_required() {
        assert!(next_fire("* * * *", "UTC", Utc::now()).is_err());
        assert!(next_fire("0 0 * * * *", "UTC", Utc::now()).is_err());
        assert!(next_fire("not a cron", "UTC", Utc::now()).is_err());
        assert!(next_fire("0 * * * *", "Mars/Olympus", Utc::now()).is_err());
        assert!(validate_schedule_spec("*/5 * * * *", "Europe/Berlin").is_ok());
    }

    #[test]
    fn fire_keys_are_stable_per_instant() {
        let id = uuid::Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        assert_eq!(fire_key(id, at), fire_key(id, at));
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        assert_ne!(fire_key(id, at), fire_key(id, later));
    }
}
