//! SMS administration handlers.

use axum::{
    extract::{Query, State},
    response::Json,
};
use tracing::instrument;

use crate::{
    api::models::pagination::Pagination,
    api::models::sms::{SendSmsRequest, SmsHealthResponse, SmsMessageResponse},
    auth::RequireAdmin,
    errors::Result,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/admin/sms/health",
    tag = "sms",
    summary = "SMS adapter health",
    responses((status = 200, description = "Configured provider and allow-list", body = SmsHealthResponse))
)]
#[instrument(skip_all)]
pub async fn health(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Json<SmsHealthResponse> {
    Json(SmsHealthResponse {
        provider: state.sms.provider().to_string(),
        allowed_countries: state.sms.allowed_countries().to_vec(),
    })
}

#[utoipa::path(
    get,
    path = "/api/admin/sms/messages",
    tag = "sms",
    summary = "List the send audit log",
    params(Pagination),
    responses((status = 200, description = "Messages, newest first", body = [SmsMessageResponse]))
)]
#[instrument(skip_all)]
pub async fn list_messages(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<SmsMessageResponse>>> {
    let messages = state.sms.list(pagination.limit(), pagination.skip()).await?;
    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/admin/sms/send",
    tag = "sms",
    summary = "Send an SMS",
    request_body = SendSmsRequest,
    responses(
        (status = 200, description = "Audit row for the send", body = SmsMessageResponse),
        (status = 400, description = "Invalid phone number"),
        (status = 403, description = "Destination region not allowed"),
    )
)]
#[instrument(skip_all)]
pub async fn send(
    State(state): State<AppState>,
    RequireAdmin(identity): RequireAdmin,
    Json(request): Json<SendSmsRequest>,
) -> Result<Json<SmsMessageResponse>> {
    let message = state.sms.send(&request.to, &request.body, identity.user_id).await?;
    Ok(Json(message.into()))
}
