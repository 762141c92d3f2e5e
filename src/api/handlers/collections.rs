//! Collections data plane handlers.
//!
//! Every request, reads included, runs inside an identity-stamped transaction
//! so row-level security sees the right subject and session variables can
//! never leak across pool checkouts.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::instrument;

use crate::{
    api::models::collections::{BatchRequest, GetParams, ListParams},
    auth::CurrentIdentity,
    collections::ListEnvelope,
    errors::Result,
    session::RequestSession,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/collections/{table}",
    tag = "collections",
    summary = "List records",
    params(
        ("table" = String, Path, description = "Collection name"),
        ListParams,
    ),
    responses(
        (status = 200, description = "Paginated records", body = ListEnvelope),
        (status = 400, description = "Bad filter, sort or pagination"),
        (status = 404, description = "Unknown collection"),
    )
)]
#[instrument(skip_all, fields(table = %table))]
pub async fn list_records(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<ListParams>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Json<ListEnvelope>> {
    let opts = params.into_options()?;
    let mut session = RequestSession::begin(&state.db, &identity).await?;
    let envelope = state.collections.list(&mut session, &table, &opts).await?;
    session.commit().await?;
    Ok(Json(envelope))
}

#[utoipa::path(
    post,
    path = "/api/collections/{table}",
    tag = "collections",
    summary = "Insert a record",
    params(("table" = String, Path, description = "Collection name")),
    request_body = serde_json::Value,
    responses(
        (status = 201, description = "Inserted record with server-populated columns", body = serde_json::Value),
        (status = 400, description = "Unknown column or bad value"),
        (status = 403, description = "Rejected by row-level security"),
        (status = 409, description = "Constraint violation"),
    )
)]
#[instrument(skip_all, fields(table = %table))]
pub async fn create_record(
    State(state): State<AppState>,
    Path(table): Path<String>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(body): Json<serde_json::Value>,
) -> Result<Response> {
    let mut session = RequestSession::begin(&state.db, &identity).await?;
    let row = state.collections.create(&mut session, &table, &body).await?;
    session.commit().await?;
    Ok((StatusCode::CREATED, Json(row)).into_response())
}

#[utoipa::path(
    get,
    path = "/api/collections/{table}/{id}",
    tag = "collections",
    summary = "Get a record by primary key",
    params(
        ("table" = String, Path, description = "Collection name"),
        ("id" = String, Path, description = "Primary key value"),
        GetParams,
    ),
    responses(
        (status = 200, description = "The record", body = serde_json::Value),
        (status = 404, description = "Unknown collection or invisible record"),
    )
)]
#[instrument(skip_all, fields(table = %table))]
pub async fn get_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    Query(params): Query<GetParams>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Json<serde_json::Value>> {
    let mut session = RequestSession::begin(&state.db, &identity).await?;
    let row = state.collections.get(&mut session, &table, &id, &params.expand_list()).await?;
    session.commit().await?;
    Ok(Json(row))
}

#[utoipa::path(
    patch,
    path = "/api/collections/{table}/{id}",
    tag = "collections",
    summary = "Partially update a record",
    params(
        ("table" = String, Path, description = "Collection name"),
        ("id" = String, Path, description = "Primary key value"),
    ),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Updated record", body = serde_json::Value),
        (status = 404, description = "Unknown collection or invisible record"),
        (status = 409, description = "Constraint violation"),
    )
)]
#[instrument(skip_all, fields(table = %table))]
pub async fn update_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    let mut session = RequestSession::begin(&state.db, &identity).await?;
    let row = state.collections.update(&mut session, &table, &id, &body).await?;
    session.commit().await?;
    Ok(Json(row))
}

#[utoipa::path(
    delete,
    path = "/api/collections/{table}/{id}",
    tag = "collections",
    summary = "Delete a record",
    params(
        ("table" = String, Path, description = "Collection name"),
        ("id" = String, Path, description = "Primary key value"),
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown collection or invisible record"),
    )
)]
#[instrument(skip_all, fields(table = %table))]
pub async fn delete_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<StatusCode> {
    let mut session = RequestSession::begin(&state.db, &identity).await?;
    state.collections.delete(&mut session, &table, &id).await?;
    session.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/collections/{table}/batch",
    tag = "collections",
    summary = "Execute a batch of operations in one transaction",
    description = "Operations run in request order inside a single transaction; the first failure rolls the whole batch back and marks the remaining operations as not run (status 424).",
    params(("table" = String, Path, description = "Collection name")),
    request_body = BatchRequest,
    responses(
        (status = 200, description = "All operations succeeded", body = [crate::collections::BatchOperationResult]),
    )
)]
#[instrument(skip_all, fields(table = %table, ops = body.operations.len()))]
pub async fn batch(
    State(state): State<AppState>,
    Path(table): Path<String>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(body): Json<BatchRequest>,
) -> Result<Response> {
    let mut session = RequestSession::begin(&state.db, &identity).await?;
    let outcome = state.collections.batch(&mut session, &table, &body.operations).await?;
    if outcome.all_ok {
        session.commit().await?;
    } else {
        session.rollback().await?;
    }
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(outcome.results)).into_response())
}
