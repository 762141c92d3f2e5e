//! Queue worker pool and lease sweeper.
//!
//! Each worker polls for ready jobs, runs the registered handler, and settles
//! the row. While a handler runs, a renewer task extends the lease at half the
//! TTL so long jobs survive; if the process dies instead, the sweeper returns
//! the row to the queue once the lease expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::db::handlers::Jobs;
use crate::db::models::jobs::Job;
use crate::jobs::{backoff_delay, trim_error, HandlerRegistry, JobContext, JobError};

pub struct WorkerPool {
    pool: PgPool,
    config: QueueConfig,
    registry: Arc<HandlerRegistry>,
}

impl WorkerPool {
    pub fn new(pool: PgPool, config: QueueConfig, registry: Arc<HandlerRegistry>) -> Self {
        Self { pool, config, registry }
    }

    /// Spawn the workers and the sweeper onto `tasks`. All of them exit when
    /// `shutdown` trips, finishing the job in hand first.
    pub fn spawn(self, tasks: &mut tokio::task::JoinSet<anyhow::Result<()>>, shutdown: CancellationToken) {
        for n in 0..self.config.workers {
            let worker = Worker {
                id: format!("worker-{n}-{}", crate::types::abbrev_uuid(&Uuid::new_v4())),
                pool: self.pool.clone(),
                config: self.config.clone(),
                registry: self.registry.clone(),
            };
            let token = shutdown.clone();
            tasks.spawn(async move {
                worker.run(token).await;
                Ok(())
            });
        }

        let sweeper_pool = self.pool.clone();
        let interval = self.config.sweep_interval;
        tasks.spawn(async move {
            run_sweeper(sweeper_pool, interval, shutdown).await;
            Ok(())
        });
    }
}

struct Worker {
    id: String,
    pool: PgPool,
    config: QueueConfig,
    registry: Arc<HandlerRegistry>,
}

impl Worker {
    async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(worker = %self.id, "Queue worker started");
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let jobs = match self.claim_batch().await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::warn!(worker = %self.id, error = %e, "Failed to claim jobs");
                    Vec::new()
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            for job in jobs {
                // Finish the claimed batch even under shutdown; the lease
                // bounds how long that can take.
                self.execute(job, &shutdown).await;
            }
        }
        tracing::info!(worker = %self.id, "Queue worker stopped");
    }

    async fn claim_batch(&self) -> crate::db::errors::Result<Vec<Job>> {
        let mut conn = self.pool.acquire().await.map_err(crate::db::errors::DbError::from)?;
        let mut repo = Jobs::new(&mut conn);
        repo.claim(&self.id, self.config.batch_size, self.config.lease_ttl.as_secs_f64()).await
    }

    async fn execute(&self, job: Job, shutdown: &CancellationToken) {
        let started = Instant::now();
        let job_type = job.job_type.clone();

        let Some(handler) = self.registry.get(&job.job_type) else {
            tracing::error!(job_id = %job.id, job_type = %job.job_type, "No handler registered, failing job");
            self.settle_failed(&job, &format!("no handler registered for type {}", job.job_type)).await;
            return;
        };

        // Renew the lease at half the TTL while the handler runs.
        let renewer = {
            let pool = self.pool.clone();
            let worker_id = self.id.clone();
            let job_id = job.id;
            let interval = self.config.lease_ttl / 2;
            let lease_secs = self.config.lease_ttl.as_secs_f64();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Ok(mut conn) = pool.acquire().await else { continue };
                    let mut repo = Jobs::new(&mut conn);
                    match repo.renew_lease(job_id, &worker_id, lease_secs).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(job_id = %job_id, "Lease renewal found no running row, stopping renewer");
                            break;
                        }
                        Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Lease renewal failed"),
                    }
                }
            })
        };

        let ctx = JobContext {
            pool: self.pool.clone(),
            job_id: job.id,
            attempt: job.attempts,
            max_attempts: job.max_attempts,
            cancel: shutdown.child_token(),
        };

        let outcome = handler.run(&ctx, job.payload.clone()).await;
        renewer.abort();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                metrics::counter!("ayb_jobs_completed_total", "type" => job_type.clone()).increment(1);
                tracing::info!(job_id = %job.id, job_type = %job_type, elapsed_ms, attempt = job.attempts, "Job completed");
                self.settle_completed(&job).await;
            }
            Err(JobError::Permanent(e)) => {
                metrics::counter!("ayb_jobs_failed_total", "type" => job_type.clone()).increment(1);
                tracing::warn!(job_id = %job.id, job_type = %job_type, error = %e, "Job failed permanently");
                self.settle_failed(&job, &trim_error(&format!("{e:#}"))).await;
            }
            Err(JobError::Retryable(e)) => {
                let message = trim_error(&format!("{e:#}"));
                if job.attempts >= job.max_attempts {
                    metrics::counter!("ayb_jobs_failed_total", "type" => job_type.clone()).increment(1);
                    tracing::warn!(
                        job_id = %job.id, job_type = %job_type, attempts = job.attempts, error = %e,
                        "Job exhausted its attempts"
                    );
                    self.settle_failed(&job, &message).await;
                } else {
                    metrics::counter!("ayb_jobs_retried_total", "type" => job_type.clone()).increment(1);
                    let delay = backoff_delay(job.attempts);
                    tracing::info!(
                        job_id = %job.id, job_type = %job_type, attempt = job.attempts,
                        retry_in_secs = delay.as_secs(), error = %e, "Job failed, scheduling retry"
                    );
                    self.settle_retry(&job, &message, delay).await;
                }
            }
        }
    }

    async fn settle_completed(&self, job: &Job) {
        let Ok(mut conn) = self.pool.acquire().await else {
            tracing::warn!(job_id = %job.id, "Could not acquire connection to complete job; sweeper will requeue");
            return;
        };
        let mut repo = Jobs::new(&mut conn);
        if let Err(e) = repo.complete(job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to mark job completed");
        }
    }

    async fn settle_failed(&self, job: &Job, message: &str) {
        let Ok(mut conn) = self.pool.acquire().await else { return };
        let mut repo = Jobs::new(&mut conn);
        if let Err(e) = repo.mark_failed(job.id, message).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to mark job failed");
        }
    }

    async fn settle_retry(&self, job: &Job, message: &str, delay: Duration) {
        let Ok(mut conn) = self.pool.acquire().await else { return };
        let mut repo = Jobs::new(&mut conn);
        if let Err(e) = repo.retry_later(job.id, message, delay.as_secs_f64()).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to requeue job");
        }
    }
}

/// Return expired-lease jobs to the queue and refresh queue gauges.
async fn run_sweeper(pool: PgPool, interval: Duration, shutdown: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Queue sweeper started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }

        let Ok(mut conn) = pool.acquire().await else {
            tracing::warn!("Sweeper could not acquire a connection");
            continue;
        };
        let mut repo = Jobs::new(&mut conn);
        match repo.sweep_expired().await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Returned expired-lease jobs to the queue"),
            Err(e) => tracing::warn!(error = %e, "Lease sweep failed"),
        }

        match repo.stats().await {
            Ok(stats) => {
                metrics::gauge!("ayb_jobs_queued").set(stats.queued as f64);
                metrics::gauge!("ayb_jobs_running").set(stats.running as f64);
                metrics::gauge!("ayb_jobs_oldest_queued_secs").set(stats.oldest_queued_secs.unwrap_or(0) as f64);
            }
            Err(e) => tracing::debug!(error = %e, "Queue stats refresh failed"),
        }
    }
    tracing::info!("Queue sweeper stopped");
}
