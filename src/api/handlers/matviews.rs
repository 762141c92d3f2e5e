//! Materialized view administration handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    api::models::matviews::{MatviewCreate, MatviewResponse, MatviewUpdate},
    auth::RequireAdmin,
    db::handlers::changelog::is_valid_identifier,
    db::handlers::Matviews,
    db::models::matviews::{MatviewCreateDBRequest, MatviewUpdateDBRequest},
    errors::{Error, Result},
    types::MatviewId,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/admin/matviews",
    tag = "matviews",
    summary = "Register a materialized view",
    request_body = MatviewCreate,
    responses(
        (status = 201, description = "Registration created", body = MatviewResponse),
        (status = 400, description = "Invalid identifier"),
        (status = 409, description = "Already registered"),
    )
)]
#[instrument(skip_all, fields(view = %request.view_name))]
pub async fn create_matview(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<MatviewCreate>,
) -> Result<(StatusCode, Json<MatviewResponse>)> {
    if !is_valid_identifier(&request.schema_name) {
        return Err(Error::bad_field("invalid schema name", "schema_name"));
    }
    if !is_valid_identifier(&request.view_name) {
        return Err(Error::bad_field("invalid view name", "view_name"));
    }

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let registration = Matviews::new(&mut conn)
        .create(&MatviewCreateDBRequest {
            schema_name: request.schema_name,
            view_name: request.view_name,
            refresh_mode: request.refresh_mode,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(registration.into())))
}

#[utoipa::path(
    get,
    path = "/api/admin/matviews",
    tag = "matviews",
    summary = "List registrations",
    responses((status = 200, description = "All registrations", body = [MatviewResponse]))
)]
#[instrument(skip_all)]
pub async fn list_matviews(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Result<Json<Vec<MatviewResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let registrations = Matviews::new(&mut conn).list().await?;
    Ok(Json(registrations.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/admin/matviews/{id}",
    tag = "matviews",
    summary = "Get a registration",
    params(("id" = uuid::Uuid, Path, description = "Registration ID")),
    responses(
        (status = 200, description = "The registration", body = MatviewResponse),
        (status = 404, description = "Unknown registration"),
    )
)]
#[instrument(skip_all)]
pub async fn get_matview(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<MatviewId>,
) -> Result<Json<MatviewResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let registration = Matviews::new(&mut conn)
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found("matview registration", id))?;
    Ok(Json(registration.into()))
}

#[utoipa::path(
    patch,
    path = "/api/admin/matviews/{id}",
    tag = "matviews",
    summary = "Update a registration",
    params(("id" = uuid::Uuid, Path, description = "Registration ID")),
    request_body = MatviewUpdate,
    responses(
        (status = 200, description = "Updated registration", body = MatviewResponse),
        (status = 404, description = "Unknown registration"),
    )
)]
#[instrument(skip_all)]
pub async fn update_matview(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<MatviewId>,
    Json(request): Json<MatviewUpdate>,
) -> Result<Json<MatviewResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let registration = Matviews::new(&mut conn)
        .update(
            id,
            &MatviewUpdateDBRequest {
                refresh_mode: request.refresh_mode,
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("matview registration", id))?;
    Ok(Json(registration.into()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/matviews/{id}",
    tag = "matviews",
    summary = "Remove a registration",
    params(("id" = uuid::Uuid, Path, description = "Registration ID")),
    responses(
        (status = 204, description = "Removed"),
        (status = 404, description = "Unknown registration"),
    )
)]
#[instrument(skip_all)]
pub async fn delete_matview(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<MatviewId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    if !Matviews::new(&mut conn).delete(id).await? {
        return Err(Error::not_found("matview registration", id));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/admin/matviews/{id}/refresh",
    tag = "matviews",
    summary = "Refresh now",
    description = "Runs `REFRESH MATERIALIZED VIEW` serialized by an advisory lock. A concurrent caller receives 412 RefreshInProgress.",
    params(("id" = uuid::Uuid, Path, description = "Registration ID")),
    responses(
        (status = 200, description = "Refresh outcome recorded on the registration", body = MatviewResponse),
        (status = 404, description = "Unknown registration"),
        (status = 412, description = "Refresh preconditions failed or already in progress"),
    )
)]
#[instrument(skip_all)]
pub async fn refresh_matview(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<MatviewId>,
) -> Result<Json<MatviewResponse>> {
    let registration = state.matviews.refresh_now(id).await?;
    Ok(Json(registration.into()))
}
