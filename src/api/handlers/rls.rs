//! Row-level security administration handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::IntoParams;

use crate::{
    api::models::rls::{PolicyCreate, PolicyResponse, RlsStatusResponse},
    auth::RequireAdmin,
    db::handlers::rls::PolicyCreateRequest,
    db::handlers::Rls,
    errors::{Error, Result},
    AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PolicyListParams {
    /// Restrict to one table
    pub table: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SchemaParam {
    /// Schema of the table (default: public)
    pub schema: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/admin/rls",
    tag = "rls",
    summary = "List policies",
    params(PolicyListParams),
    responses((status = 200, description = "Policies from pg_policies", body = [PolicyResponse]))
)]
#[instrument(skip_all)]
pub async fn list_policies(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Query(params): Query<PolicyListParams>,
) -> Result<Json<Vec<PolicyResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let policies = Rls::new(&mut conn).list_policies(params.table.as_deref()).await?;
    Ok(Json(policies.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/admin/rls/{table}",
    tag = "rls",
    summary = "RLS status for a table",
    params(("table" = String, Path, description = "Table name"), SchemaParam),
    responses(
        (status = 200, description = "Whether RLS is enabled/forced", body = RlsStatusResponse),
        (status = 404, description = "Unknown table"),
    )
)]
#[instrument(skip_all, fields(table = %table))]
pub async fn table_status(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(table): Path<String>,
    Query(params): Query<SchemaParam>,
) -> Result<Json<RlsStatusResponse>> {
    let schema = params.schema.as_deref().unwrap_or("public");
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let status = Rls::new(&mut conn)
        .table_status(schema, &table)
        .await?
        .ok_or_else(|| Error::not_found("table", format!("{schema}.{table}")))?;
    Ok(Json(status.into()))
}

#[utoipa::path(
    post,
    path = "/api/admin/rls/{table}/enable",
    tag = "rls",
    summary = "Enable row-level security on a table",
    params(("table" = String, Path, description = "Table name"), SchemaParam),
    responses((status = 204, description = "RLS enabled"))
)]
#[instrument(skip_all, fields(table = %table))]
pub async fn enable_rls(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(table): Path<String>,
    Query(params): Query<SchemaParam>,
) -> Result<StatusCode> {
    let schema = params.schema.as_deref().unwrap_or("public");
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Rls::new(&mut conn).set_enabled(schema, &table, true).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/admin/rls/{table}/disable",
    tag = "rls",
    summary = "Disable row-level security on a table",
    params(("table" = String, Path, description = "Table name"), SchemaParam),
    responses((status = 204, description = "RLS disabled"))
)]
#[instrument(skip_all, fields(table = %table))]
pub async fn disable_rls(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(table): Path<String>,
    Query(params): Query<SchemaParam>,
) -> Result<StatusCode> {
    let schema = params.schema.as_deref().unwrap_or("public");
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Rls::new(&mut conn).set_enabled(schema, &table, false).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/admin/rls/{table}",
    tag = "rls",
    summary = "Create a policy on a table",
    params(("table" = String, Path, description = "Table name")),
    request_body = PolicyCreate,
    responses(
        (status = 201, description = "Policy created"),
        (status = 400, description = "Invalid identifier or missing expressions"),
    )
)]
#[instrument(skip_all, fields(table = %table, policy = %request.policy_name))]
pub async fn create_policy(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(table): Path<String>,
    Json(request): Json<PolicyCreate>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Rls::new(&mut conn)
        .create_policy(&PolicyCreateRequest {
            schema_name: request.schema_name,
            table_name: table,
            policy_name: request.policy_name,
            command: request.command,
            using_expr: request.using_expr,
            check_expr: request.check_expr,
        })
        .await?;
    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    delete,
    path = "/api/admin/rls/{table}/{policy}",
    tag = "rls",
    summary = "Drop a policy",
    params(
        ("table" = String, Path, description = "Table name"),
        ("policy" = String, Path, description = "Policy name"),
        SchemaParam,
    ),
    responses((status = 204, description = "Policy dropped"))
)]
#[instrument(skip_all, fields(table = %table, policy = %policy))]
pub async fn drop_policy(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path((table, policy)): Path<(String, String)>,
    Query(params): Query<SchemaParam>,
) -> Result<StatusCode> {
    let schema = params.schema.as_deref().unwrap_or("public");
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Rls::new(&mut conn).drop_policy(schema, &table, &policy).await?;
    Ok(StatusCode::NO_CONTENT)
}
