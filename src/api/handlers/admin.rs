//! Admin control plane: status, password auth, SQL exec, schema refresh and
//! change-log replication management.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};
use sqlx::Row;
use tracing::instrument;

use crate::{
    api::models::admin::{
        AuthRequest, AuthResponse, ReplicatedTableResponse, ReplicationRequest, SchemaRefreshResponse, SqlExecRequest,
        SqlExecResponse, StatusResponse,
    },
    auth::RequireAdmin,
    db::handlers::Changelog,
    errors::{Error, Result},
    schema::SchemaSnapshot,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/admin/status",
    tag = "admin",
    summary = "Auth status",
    responses((status = 200, description = "Whether authentication is enforced", body = StatusResponse))
)]
#[instrument(skip_all)]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        auth: state.auth.auth_enabled(),
    })
}

#[utoipa::path(
    post,
    path = "/api/admin/auth",
    tag = "admin",
    summary = "Exchange the admin password for a session token",
    request_body = AuthRequest,
    responses(
        (status = 200, description = "Bearer token for subsequent admin calls", body = AuthResponse),
        (status = 401, description = "Wrong password"),
    )
)]
#[instrument(skip_all)]
pub async fn authenticate(State(state): State<AppState>, Json(request): Json<AuthRequest>) -> Result<Json<AuthResponse>> {
    let token = state.auth.issue_session(&request.password).await?;
    Ok(Json(AuthResponse { token }))
}

#[utoipa::path(
    get,
    path = "/api/schema",
    tag = "admin",
    summary = "Current schema snapshot",
    responses((status = 200, description = "Tables, columns, relationships and functions", body = SchemaSnapshot))
)]
#[instrument(skip_all)]
pub async fn get_schema(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Json<SchemaSnapshot> {
    Json((*state.schema.current()).clone())
}

#[utoipa::path(
    post,
    path = "/api/admin/schema/refresh",
    tag = "admin",
    summary = "Re-introspect the database",
    description = "Rebuilds the schema snapshot. A refresh already in flight is reported as skipped, with the current snapshot's counts.",
    responses((status = 200, description = "Refresh outcome", body = SchemaRefreshResponse))
)]
#[instrument(skip_all)]
pub async fn refresh_schema(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Result<Json<SchemaRefreshResponse>> {
    let outcome = state.schema.refresh().await?;
    let snapshot = outcome.snapshot();
    Ok(Json(SchemaRefreshResponse {
        refreshed: !outcome.was_skipped(),
        tables: snapshot.tables.len(),
        functions: snapshot.functions.len(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/admin/sql",
    tag = "admin",
    summary = "Execute a single SQL statement",
    request_body = SqlExecRequest,
    responses(
        (status = 200, description = "Result rows and affected count", body = SqlExecResponse),
        (status = 400, description = "Empty or multiple statements"),
    )
)]
#[instrument(skip_all)]
pub async fn exec_sql(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<SqlExecRequest>,
) -> Result<Json<SqlExecResponse>> {
    let statement = request.statement.trim().trim_end_matches(';').trim();
    if statement.is_empty() {
        return Err(Error::bad_request("statement must not be empty"));
    }
    if statement.contains(';') {
        return Err(Error::bad_request("exactly one statement is allowed"));
    }

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let wrapped = format!("WITH q AS ({statement}) SELECT row_to_json(q) AS \"row\" FROM q");

    // DDL and DML without RETURNING cannot run inside a CTE; those fall back
    // to a plain execute with no result rows.
    match sqlx::query(&wrapped).fetch_all(&mut *conn).await {
        Ok(rows) => {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                out.push(
                    row.try_get::<serde_json::Value, _>("row")
                        .map_err(|e| Error::Database(e.into()))?,
                );
            }
            let count = out.len() as u64;
            Ok(Json(SqlExecResponse {
                rows: out,
                rows_affected: count,
            }))
        }
        Err(_) => {
            let done = sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(crate::db::errors::DbError::from)?;
            Ok(Json(SqlExecResponse {
                rows: Vec::new(),
                rows_affected: done.rows_affected(),
            }))
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/admin/replication",
    tag = "admin",
    summary = "List replicated tables",
    description = "Tables currently carrying the change-log trigger that feeds the realtime bus.",
    responses((status = 200, description = "Replicated tables", body = [ReplicatedTableResponse]))
)]
#[instrument(skip_all)]
pub async fn list_replicated(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
) -> Result<Json<Vec<ReplicatedTableResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let tables = Changelog::new(&mut conn).list_replicated().await?;
    Ok(Json(
        tables
            .into_iter()
            .map(|t| ReplicatedTableResponse {
                schema_name: t.schema_name,
                table_name: t.table_name,
            })
            .collect(),
    ))
}

#[utoipa::path(
    post,
    path = "/api/admin/replication/enable",
    tag = "admin",
    summary = "Install the change-log trigger on a table",
    request_body = ReplicationRequest,
    responses(
        (status = 204, description = "Trigger installed"),
        (status = 400, description = "Invalid identifier"),
    )
)]
#[instrument(skip_all, fields(table = %request.table_name))]
pub async fn enable_replication(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<ReplicationRequest>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Changelog::new(&mut conn)
        .install_trigger(&request.schema_name, &request.table_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/admin/replication/disable",
    tag = "admin",
    summary = "Drop the change-log trigger from a table",
    request_body = ReplicationRequest,
    responses(
        (status = 204, description = "Trigger dropped"),
        (status = 400, description = "Invalid identifier"),
    )
)]
#[instrument(skip_all, fields(table = %request.table_name))]
pub async fn disable_replication(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<ReplicationRequest>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Changelog::new(&mut conn)
        .drop_trigger(&request.schema_name, &request.table_name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
