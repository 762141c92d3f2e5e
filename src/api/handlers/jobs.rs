//! Job queue administration handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    api::models::jobs::{EnqueueResponse, JobCreate, JobListParams, JobResponse},
    auth::RequireAdmin,
    db::handlers::Jobs,
    db::models::jobs::JobStats,
    errors::{Error, Result},
    jobs::EnqueueOptions,
    types::JobId,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/admin/jobs",
    tag = "jobs",
    summary = "List jobs",
    params(JobListParams),
    responses((status = 200, description = "Jobs, newest first", body = [JobResponse]))
)]
#[instrument(skip_all)]
pub async fn list_jobs(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Query(params): Query<JobListParams>,
) -> Result<Json<Vec<JobResponse>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let skip = params.skip.unwrap_or(0).max(0);
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let jobs = Jobs::new(&mut conn)
        .list(params.state, params.job_type.as_deref(), limit, skip)
        .await?;
    Ok(Json(jobs.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/admin/jobs",
    tag = "jobs",
    summary = "Enqueue a job",
    request_body = JobCreate,
    responses(
        (status = 201, description = "Job enqueued", body = EnqueueResponse),
        (status = 400, description = "Unknown job type"),
    )
)]
#[instrument(skip_all, fields(job_type = %request.job_type))]
pub async fn enqueue_job(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<JobCreate>,
) -> Result<(StatusCode, Json<EnqueueResponse>)> {
    let outcome = state
        .queue
        .enqueue(
            &request.job_type,
            request.payload,
            EnqueueOptions {
                run_at: request.run_at,
                max_attempts: request.max_attempts,
                idempotency_key: request.idempotency_key,
                schedule_id: None,
            },
        )
        .await?;
    let response = EnqueueResponse {
        id: outcome.job_id(),
        deduplicated: !outcome.is_created(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/api/admin/jobs/stats",
    tag = "jobs",
    summary = "Queue statistics",
    responses((status = 200, description = "Counts per state and oldest-queued age", body = JobStats))
)]
#[instrument(skip_all)]
pub async fn job_stats(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Result<Json<JobStats>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let stats = Jobs::new(&mut conn).stats().await?;
    Ok(Json(stats))
}

#[utoipa::path(
    get,
    path = "/api/admin/jobs/{id}",
    tag = "jobs",
    summary = "Get a job",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "The job", body = JobResponse),
        (status = 404, description = "Unknown job"),
    )
)]
#[instrument(skip_all)]
pub async fn get_job(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<JobId>,
) -> Result<Json<JobResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let job = Jobs::new(&mut conn).get(id).await?.ok_or_else(|| Error::not_found("job", id))?;
    Ok(Json(job.into()))
}

#[utoipa::path(
    post,
    path = "/api/admin/jobs/{id}/retry",
    tag = "jobs",
    summary = "Retry a failed or canceled job",
    description = "Returns the job to the queue with a reset attempt counter.",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Requeued job", body = JobResponse),
        (status = 404, description = "Unknown job"),
        (status = 409, description = "Job is not in a retryable state"),
    )
)]
#[instrument(skip_all)]
pub async fn retry_job(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<JobId>,
) -> Result<Json<JobResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let mut repo = Jobs::new(&mut conn);
    if repo.get(id).await?.is_none() {
        return Err(Error::not_found("job", id));
    }
    let job = repo.retry(id).await?.ok_or_else(|| Error::Conflict {
        message: "only failed or canceled jobs can be retried".to_string(),
        code: None,
    })?;
    Ok(Json(job.into()))
}

#[utoipa::path(
    post,
    path = "/api/admin/jobs/{id}/cancel",
    tag = "jobs",
    summary = "Cancel a job",
    description = "Marks a queued or running job canceled. A running handler finishes its lease but its outcome no longer changes the state.",
    params(("id" = uuid::Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Canceled job", body = JobResponse),
        (status = 404, description = "Unknown job"),
        (status = 409, description = "Job already terminal"),
    )
)]
#[instrument(skip_all)]
pub async fn cancel_job(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<JobId>,
) -> Result<Json<JobResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let mut repo = Jobs::new(&mut conn);
    if repo.get(id).await?.is_none() {
        return Err(Error::not_found("job", id));
    }
    let job = repo.cancel(id).await?.ok_or_else(|| Error::Conflict {
        message: "job already reached a terminal state".to_string(),
        code: None,
    })?;
    Ok(Json(job.into()))
}
