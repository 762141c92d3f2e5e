//! Application administration handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    api::models::apps::{AppCreate, AppResponse, AppUpdate},
    auth::RequireAdmin,
    db::handlers::Apps,
    db::models::apps::{AppCreateDBRequest, AppUpdateDBRequest},
    errors::{Error, Result},
    types::AppId,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/admin/apps",
    tag = "apps",
    summary = "Create an application",
    request_body = AppCreate,
    responses(
        (status = 201, description = "Application created", body = AppResponse),
        (status = 409, description = "Name already exists"),
    )
)]
#[instrument(skip_all, fields(name = %request.name))]
pub async fn create_app(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<AppCreate>,
) -> Result<(StatusCode, Json<AppResponse>)> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let app = Apps::new(&mut conn)
        .create(&AppCreateDBRequest {
            name: request.name,
            description: request.description,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(app.into())))
}

#[utoipa::path(
    get,
    path = "/api/admin/apps",
    tag = "apps",
    summary = "List applications",
    responses((status = 200, description = "All applications", body = [AppResponse]))
)]
#[instrument(skip_all)]
pub async fn list_apps(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Result<Json<Vec<AppResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let apps = Apps::new(&mut conn).list().await?;
    Ok(Json(apps.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/admin/apps/{id}",
    tag = "apps",
    summary = "Get an application",
    params(("id" = uuid::Uuid, Path, description = "Application ID")),
    responses(
        (status = 200, description = "The application", body = AppResponse),
        (status = 404, description = "Unknown application"),
    )
)]
#[instrument(skip_all)]
pub async fn get_app(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<AppId>,
) -> Result<Json<AppResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let app = Apps::new(&mut conn).get(id).await?.ok_or_else(|| Error::not_found("app", id))?;
    Ok(Json(app.into()))
}

#[utoipa::path(
    patch,
    path = "/api/admin/apps/{id}",
    tag = "apps",
    summary = "Update an application",
    params(("id" = uuid::Uuid, Path, description = "Application ID")),
    request_body = AppUpdate,
    responses(
        (status = 200, description = "Updated application", body = AppResponse),
        (status = 404, description = "Unknown application"),
    )
)]
#[instrument(skip_all)]
pub async fn update_app(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<AppId>,
    Json(request): Json<AppUpdate>,
) -> Result<Json<AppResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let app = Apps::new(&mut conn)
        .update(
            id,
            &AppUpdateDBRequest {
                name: request.name,
                description: request.description,
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("app", id))?;
    Ok(Json(app.into()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/apps/{id}",
    tag = "apps",
    summary = "Delete an application",
    description = "Cascades to the application's API keys.",
    params(("id" = uuid::Uuid, Path, description = "Application ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown application"),
    )
)]
#[instrument(skip_all)]
pub async fn delete_app(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<AppId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    if !Apps::new(&mut conn).delete(id).await? {
        return Err(Error::not_found("app", id));
    }
    Ok(StatusCode::NO_CONTENT)
}
