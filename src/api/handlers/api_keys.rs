//! API key administration handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    api::models::api_keys::{ApiKeyCreate, ApiKeyResponse, ApiKeyWithSecretResponse},
    auth::RequireAdmin,
    crypto,
    db::handlers::ApiKeys,
    db::models::api_keys::ApiKeyCreateDBRequest,
    errors::{Error, Result},
    types::ApiKeyId,
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/admin/api-keys",
    tag = "api-keys",
    summary = "Create an API key",
    description = "Generates a key and stores only its digest. The raw key appears in this response and nowhere else.",
    request_body = ApiKeyCreate,
    responses(
        (status = 201, description = "Key created", body = ApiKeyWithSecretResponse),
        (status = 400, description = "Invalid scope"),
    )
)]
#[instrument(skip_all, fields(name = %request.name))]
pub async fn create_api_key(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<ApiKeyCreate>,
) -> Result<(StatusCode, Json<ApiKeyWithSecretResponse>)> {
    if !matches!(request.scope.as_str(), "app" | "service") {
        return Err(Error::bad_field("scope must be app or service", "scope"));
    }
    if request.scope == "app" && request.app_id.is_none() {
        return Err(Error::bad_field("app-scoped keys need an app_id", "app_id"));
    }

    let raw_key = crypto::generate_api_key();
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let key = ApiKeys::new(&mut conn)
        .create(&ApiKeyCreateDBRequest {
            name: request.name,
            key_hash: crypto::hash_api_key(&raw_key),
            scope: request.scope,
            app_id: request.app_id,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiKeyWithSecretResponse {
            id: key.id,
            name: key.name,
            scope: key.scope,
            app_id: key.app_id,
            key: raw_key,
            created_at: key.created_at,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/admin/api-keys",
    tag = "api-keys",
    summary = "List API keys",
    responses((status = 200, description = "Keys without secrets", body = [ApiKeyResponse]))
)]
#[instrument(skip_all)]
pub async fn list_api_keys(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Result<Json<Vec<ApiKeyResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let keys = ApiKeys::new(&mut conn).list().await?;
    Ok(Json(keys.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/api-keys/{id}",
    tag = "api-keys",
    summary = "Revoke an API key",
    params(("id" = uuid::Uuid, Path, description = "Key ID")),
    responses(
        (status = 204, description = "Revoked"),
        (status = 404, description = "Unknown key"),
    )
)]
#[instrument(skip_all)]
pub async fn delete_api_key(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<ApiKeyId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    if !ApiKeys::new(&mut conn).delete(id).await? {
        return Err(Error::not_found("api key", id));
    }
    Ok(StatusCode::NO_CONTENT)
}
