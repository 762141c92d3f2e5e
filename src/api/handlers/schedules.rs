//! Schedule administration handlers. Mutations cancel and respawn the
//! affected scheduler task so changes take effect immediately.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use tracing::instrument;

use crate::{
    api::models::schedules::{ScheduleCreate, ScheduleResponse, ScheduleUpdate},
    auth::RequireAdmin,
    db::handlers::Schedules,
    db::models::schedules::{ScheduleCreateDBRequest, ScheduleUpdateDBRequest},
    errors::{Error, Result},
    scheduler::{next_fire, validate_schedule_spec},
    types::ScheduleId,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/admin/schedules",
    tag = "schedules",
    summary = "Create a schedule",
    request_body = ScheduleCreate,
    responses(
        (status = 201, description = "Schedule created", body = ScheduleResponse),
        (status = 400, description = "Invalid cron expression or timezone"),
        (status = 409, description = "Name already exists"),
    )
)]
#[instrument(skip_all, fields(name = %request.name))]
pub async fn create_schedule(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<ScheduleCreate>,
) -> Result<(StatusCode, Json<ScheduleResponse>)> {
    validate_schedule_spec(&request.cron_expr, &request.timezone).map_err(Error::bad_request)?;
    let next_run_at = next_fire(&request.cron_expr, &request.timezone, Utc::now()).map_err(Error::bad_request)?;

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let schedule = Schedules::new(&mut conn)
        .create(&ScheduleCreateDBRequest {
            name: request.name,
            job_type: request.job_type,
            payload: request.payload,
            cron_expr: request.cron_expr,
            timezone: request.timezone,
            enabled: request.enabled,
            max_attempts: request.max_attempts.unwrap_or(state.config.queue.max_attempts),
            next_run_at,
        })
        .await?;
    drop(conn);

    if schedule.enabled {
        state.scheduler.start(schedule.id, state.shutdown.clone()).await;
    }
    Ok((StatusCode::CREATED, Json(schedule.into())))
}

#[utoipa::path(
    get,
    path = "/api/admin/schedules",
    tag = "schedules",
    summary = "List schedules",
    responses((status = 200, description = "All schedules", body = [ScheduleResponse]))
)]
#[instrument(skip_all)]
pub async fn list_schedules(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Result<Json<Vec<ScheduleResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let schedules = Schedules::new(&mut conn).list().await?;
    Ok(Json(schedules.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/admin/schedules/{id}",
    tag = "schedules",
    summary = "Get a schedule",
    params(("id" = uuid::Uuid, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "The schedule", body = ScheduleResponse),
        (status = 404, description = "Unknown schedule"),
    )
)]
#[instrument(skip_all)]
pub async fn get_schedule(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<ScheduleId>,
) -> Result<Json<ScheduleResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let schedule = Schedules::new(&mut conn)
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found("schedule", id))?;
    Ok(Json(schedule.into()))
}

#[utoipa::path(
    patch,
    path = "/api/admin/schedules/{id}",
    tag = "schedules",
    summary = "Update a schedule",
    params(("id" = uuid::Uuid, Path, description = "Schedule ID")),
    request_body = ScheduleUpdate,
    responses(
        (status = 200, description = "Updated schedule", body = ScheduleResponse),
        (status = 400, description = "Invalid cron expression or timezone"),
        (status = 404, description = "Unknown schedule"),
    )
)]
#[instrument(skip_all)]
pub async fn update_schedule(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<ScheduleId>,
    Json(request): Json<ScheduleUpdate>,
) -> Result<Json<ScheduleResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let mut repo = Schedules::new(&mut conn);
    let existing = repo.get(id).await?.ok_or_else(|| Error::not_found("schedule", id))?;

    let cron_expr = request.cron_expr.clone().unwrap_or_else(|| existing.cron_expr.clone());
    let timezone = request.timezone.clone().unwrap_or_else(|| existing.timezone.clone());
    validate_schedule_spec(&cron_expr, &timezone).map_err(Error::bad_request)?;
    let next_run_at = next_fire(&cron_expr, &timezone, Utc::now()).map_err(Error::bad_request)?;

    let schedule = repo
        .update(
            id,
            &ScheduleUpdateDBRequest {
                job_type: request.job_type,
                payload: request.payload,
                cron_expr: request.cron_expr,
                timezone: request.timezone,
                enabled: None,
                max_attempts: request.max_attempts,
                next_run_at: Some(next_run_at),
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("schedule", id))?;
    drop(conn);

    state.scheduler.resync(id, state.shutdown.clone()).await;
    Ok(Json(schedule.into()))
}

#[utoipa::path(
    post,
    path = "/api/admin/schedules/{id}/enable",
    tag = "schedules",
    summary = "Enable a schedule",
    params(("id" = uuid::Uuid, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "Enabled", body = ScheduleResponse),
        (status = 404, description = "Unknown schedule"),
    )
)]
#[instrument(skip_all)]
pub async fn enable_schedule(
    State(state): State<AppState>,
    admin: RequireAdmin,
    Path(id): Path<ScheduleId>,
) -> Result<Json<ScheduleResponse>> {
    set_enabled(state, admin, id, true).await
}

#[utoipa::path(
    post,
    path = "/api/admin/schedules/{id}/disable",
    tag = "schedules",
    summary = "Disable a schedule",
    params(("id" = uuid::Uuid, Path, description = "Schedule ID")),
    responses(
        (status = 200, description = "Disabled", body = ScheduleResponse),
        (status = 404, description = "Unknown schedule"),
    )
)]
#[instrument(skip_all)]
pub async fn disable_schedule(
    State(state): State<AppState>,
    admin: RequireAdmin,
    Path(id): Path<ScheduleId>,
) -> Result<Json<ScheduleResponse>> {
    set_enabled(state, admin, id, false).await
}

async fn set_enabled(state: AppState, _admin: RequireAdmin, id: ScheduleId, enabled: bool) -> Result<Json<ScheduleResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let mut repo = Schedules::new(&mut conn);
    let existing = repo.get(id).await?.ok_or_else(|| Error::not_found("schedule", id))?;

    // Re-enabling recomputes the next fire from now, so a long-disabled
    // schedule does not fire immediately for a stale instant.
    let next_run_at = if enabled {
        Some(next_fire(&existing.cron_expr, &existing.timezone, Utc::now()).map_err(Error::bad_request)?)
    } else {
        None
    };

    let schedule = repo
        .update(
            id,
            &ScheduleUpdateDBRequest {
                enabled: Some(enabled),
                next_run_at,
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("schedule", id))?;
    drop(conn);

    state.scheduler.resync(id, state.shutdown.clone()).await;
    Ok(Json(schedule.into()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/schedules/{id}",
    tag = "schedules",
    summary = "Delete a schedule",
    params(("id" = uuid::Uuid, Path, description = "Schedule ID")),
    responses(
        (status = 204, description = "Deleted; the running task is cancelled"),
        (status = 404, description = "Unknown schedule"),
    )
)]
#[instrument(skip_all)]
pub async fn delete_schedule(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<ScheduleId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    if !Schedules::new(&mut conn).delete(id).await? {
        return Err(Error::not_found("schedule", id));
    }
    drop(conn);

    state.scheduler.stop(id).await;
    Ok(StatusCode::NO_CONTENT)
}
