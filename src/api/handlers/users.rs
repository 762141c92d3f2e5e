//! User administration handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    api::models::pagination::Pagination,
    api::models::users::{UserCreate, UserResponse, UserUpdate},
    auth::{password, RequireAdmin},
    db::handlers::Users,
    db::models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    errors::{Error, Result},
    types::UserId,
    AppState,
};

const VALID_ROLES: &[&str] = &["user", "admin", "service"];

fn validate_role(role: &str) -> Result<()> {
    if VALID_ROLES.contains(&role) {
        Ok(())
    } else {
        Err(Error::bad_field(format!("invalid role {role}"), "role"))
    }
}

#[utoipa::path(
    post,
    path = "/api/admin/users",
    tag = "users",
    summary = "Create a user",
    request_body = UserCreate,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 409, description = "Email already registered"),
    )
)]
#[instrument(skip_all, fields(email = %request.email))]
pub async fn create_user(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    validate_role(&request.role)?;
    let password_hash = request.password.as_deref().map(password::hash_password).transpose()?;

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let user = Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: request.email,
            password_hash,
            role: request.role,
            verified: request.verified,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "users",
    summary = "List users",
    params(Pagination),
    responses((status = 200, description = "Users, newest first", body = [UserResponse]))
)]
#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<UserResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let users = Users::new(&mut conn).list(pagination.limit(), pagination.skip()).await?;
    Ok(Json(users.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/admin/users/{id}",
    tag = "users",
    summary = "Get a user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "The user", body = UserResponse),
        (status = 404, description = "Unknown user"),
    )
)]
#[instrument(skip_all)]
pub async fn get_user(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<UserId>,
) -> Result<Json<UserResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let user = Users::new(&mut conn).get(id).await?.ok_or_else(|| Error::not_found("user", id))?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}",
    tag = "users",
    summary = "Update a user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 404, description = "Unknown user"),
    )
)]
#[instrument(skip_all)]
pub async fn update_user(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<UserId>,
    Json(request): Json<UserUpdate>,
) -> Result<Json<UserResponse>> {
    if let Some(role) = &request.role {
        validate_role(role)?;
    }
    let password_hash = request.password.as_deref().map(password::hash_password).transpose()?.map(Some);

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let user = Users::new(&mut conn)
        .update(
            id,
            &UserUpdateDBRequest {
                email: request.email,
                password_hash,
                role: request.role,
                verified: request.verified,
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("user", id))?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}",
    tag = "users",
    summary = "Delete a user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown user"),
    )
)]
#[instrument(skip_all)]
pub async fn delete_user(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<UserId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    if !Users::new(&mut conn).delete(id).await? {
        return Err(Error::not_found("user", id));
    }
    Ok(StatusCode::NO_CONTENT)
}
