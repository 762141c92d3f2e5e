//! Durable job queue: leased, at-least-once execution of typed jobs.
//!
//! Jobs are rows in `_ayb_jobs`. Workers claim ready rows with
//! `FOR UPDATE SKIP LOCKED`, run the registered handler for the job's type,
//! and settle the row according to the outcome. A sweeper returns
//! expired-lease jobs to the queue, so a crashed worker costs one attempt and
//! some latency, never a lost job. Handlers must therefore be idempotent.

pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::QueueConfig;
use crate::db::errors::Result as DbResult;
use crate::db::handlers::Jobs;
use crate::db::models::jobs::{EnqueueOutcome, JobCreateDBRequest};
use crate::types::{JobId, ScheduleId};

/// Base backoff for a failed attempt.
pub const BACKOFF_BASE: Duration = Duration::from_secs(30);
/// Backoff ceiling.
pub const BACKOFF_CAP: Duration = Duration::from_secs(3600);
/// Jitter applied to the backoff, as a fraction of the delay.
pub const BACKOFF_JITTER: f64 = 0.2;
/// Stored error text is trimmed to this many bytes.
pub const MAX_ERROR_LEN: usize = 2_000;

/// Error returned by a job handler. `Retryable` consumes an attempt and goes
/// back to the queue with backoff; `Permanent` fails the job immediately.
#[derive(Debug)]
pub enum JobError {
    Retryable(anyhow::Error),
    Permanent(anyhow::Error),
}

impl JobError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        JobError::Retryable(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        JobError::Permanent(err.into())
    }

    pub fn message(&self) -> String {
        match self {
            JobError::Retryable(e) | JobError::Permanent(e) => format!("{e:#}"),
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::Retryable(err)
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Retryable(e) => write!(f, "retryable: {e}"),
            JobError::Permanent(e) => write!(f, "permanent: {e}"),
        }
    }
}

/// Context a handler runs with. The cancellation token trips on shutdown;
/// long handlers should check it at convenient points.
pub struct JobContext {
    pub pool: PgPool,
    pub job_id: JobId,
    pub attempt: i32,
    pub max_attempts: i32,
    pub cancel: CancellationToken,
}

/// A typed job handler, discovered by type string at dispatch time.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;

    async fn run(&self, ctx: &JobContext, payload: serde_json::Value) -> Result<(), JobError>;
}

/// Registry mapping job type strings to handlers. Populated at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        if self.handlers.insert(job_type, handler).is_some() {
            tracing::warn!(job_type, "Handler registered twice, keeping the later one");
        }
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

/// Options for [`JobQueue::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub max_attempts: Option<i32>,
    pub idempotency_key: Option<String>,
    pub schedule_id: Option<ScheduleId>,
}

/// Producer-side facade over the queue table.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue a job; idempotency collisions return the existing id.
    #[instrument(skip(self, payload, opts), err)]
    pub async fn enqueue(&self, job_type: &str, payload: serde_json::Value, opts: EnqueueOptions) -> DbResult<EnqueueOutcome> {
        let mut conn = self.pool.acquire().await.map_err(crate::db::errors::DbError::from)?;
        let mut repo = Jobs::new(&mut conn);
        let outcome = repo
            .enqueue(&JobCreateDBRequest {
                job_type: job_type.to_string(),
                payload,
                run_at: opts.run_at,
                max_attempts: opts.max_attempts.unwrap_or(self.config.max_attempts),
                idempotency_key: opts.idempotency_key,
                schedule_id: opts.schedule_id,
            })
            .await?;
        if outcome.is_created() {
            metrics::counter!("ayb_jobs_enqueued_total", "type" => job_type.to_string()).increment(1);
        } else {
            tracing::debug!(job_type, "Enqueue collapsed onto existing job via idempotency key");
        }
        Ok(outcome)
    }
}

/// Backoff before the next attempt: `min(30s * 2^(attempts-1), 1h)`, jittered
/// by ±20% so retry herds spread out.
pub fn backoff_delay(attempts: i32) -> Duration {
    let exponent = attempts.saturating_sub(1).clamp(0, 30) as u32;
    let base = BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    let secs = base.as_secs_f64() * (1.0 + jitter);
    Duration::from_secs_f64(secs.max(1.0))
}

/// Trim stored error text to a bounded length on a char boundary.
pub fn trim_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &message[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        fn job_type(&self) -> &'static str {
            "noop"
        }

        async fn run(&self, _ctx: &JobContext, _payload: serde_json::Value) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn registry_finds_handlers_by_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(NoopHandler));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.types(), vec!["noop"]);
    }

    #[test]
    fn backoff_doubles_and_caps_within_jitter_bounds() {
        let expected = [
            (1, 30.0),
            (2, 60.0),
            (3, 120.0),
            (4, 240.0),
            (5, 480.0),
            (6, 960.0),
            (7, 1920.0),
            (8, 3600.0),
            (20, 3600.0),
        ];
        for (attempts, nominal) in expected {
            for _ in 0..20 {
                let delay = backoff_delay(attempts).as_secs_f64();
                let low = nominal * (1.0 - BACKOFF_JITTER) - 0.001;
                let high = nominal * (1.0 + BACKOFF_JITTER) + 0.001;
                assert!(
                    (low..=high).contains(&delay),
                    "attempts={attempts}: delay {delay} outside [{low}, {high}]"
                );
            }
        }
    }

    #[test]
    fn backoff_handles_degenerate_attempt_counts() {
        assert!(backoff_delay(0).as_secs_f64() >= 1.0);
        assert!(backoff_delay(-5).as_secs_f64() >= 1.0);
        assert!(backoff_delay(i32::MAX).as_secs() <= (3600.0 * (1.0 + BACKOFF_JITTER)) as u64 + 1);
    }

    #[test]
    fn error_text_is_trimmed_on_char_boundaries() {
        let short = "boom";
        assert_eq!(trim_error(short), "boom");

        let long = "é".repeat(MAX_ERROR_LEN);
        let trimmed = trim_error(&long);
        assert!(trimmed.len() <= MAX_ERROR_LEN + '…'.len_utf8());
        assert!(trimmed.ends_with('…'));
    }

    #[test]
    fn job_error_classification_survives_conversion() {
        let retryable: JobError = anyhow::anyhow!("transient").into();
        assert!(matches!(retryable, JobError::Retryable(_)));
        let permanent = JobError::permanent(anyhow::anyhow!("bad payload"));
        assert!(matches!(permanent, JobError::Permanent(_)));
    }
}
