//! RPC handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::instrument;

use crate::{auth::CurrentIdentity, errors::Result, rpc::RpcResult, session::RequestSession, AppState};

#[utoipa::path(
    post,
    path = "/api/rpc/{function_name}",
    tag = "rpc",
    summary = "Invoke a stored procedure",
    description = "Invokes a function from the schema cache with named JSON arguments. Scalar results return as a bare value, set results as an array of row objects, void as 204.",
    params(("function_name" = String, Path, description = "Function name, optionally schema-qualified")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Function result"),
        (status = 204, description = "Function returned void"),
        (status = 400, description = "Unknown argument name or bad value"),
        (status = 404, description = "Unknown function"),
    )
)]
#[instrument(skip_all, fields(function = %function_name))]
pub async fn invoke(
    State(state): State<AppState>,
    Path(function_name): Path<String>,
    CurrentIdentity(identity): CurrentIdentity,
    body: Option<Json<serde_json::Value>>,
) -> Result<Response> {
    let args = body.map(|Json(v)| v).unwrap_or(serde_json::Value::Null);
    let mut session = RequestSession::begin(&state.db, &identity).await?;
    let result = state.rpc.invoke(&mut session, &function_name, &args).await?;
    session.commit().await?;

    Ok(match result {
        RpcResult::Void => StatusCode::NO_CONTENT.into_response(),
        RpcResult::Scalar(value) => Json(value).into_response(),
        RpcResult::Rows(rows) => Json(rows).into_response(),
    })
}
