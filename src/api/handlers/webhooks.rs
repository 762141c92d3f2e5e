//! Webhook management handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    api::models::pagination::Pagination,
    api::models::webhooks::{
        validate_events, DeliveryResponse, WebhookCreate, WebhookResponse, WebhookUpdate, WebhookWithSecretResponse,
    },
    auth::RequireAdmin,
    crypto,
    db::handlers::Webhooks,
    db::models::webhooks::{WebhookCreateDBRequest, WebhookUpdateDBRequest},
    errors::{Error, Result},
    types::WebhookId,
    webhooks::service::DeliveryAttempt,
    AppState,
};

fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url).map_err(|e| Error::bad_field(format!("invalid webhook URL: {e}"), "url"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::bad_field("webhook URL must be http or https", "url"));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/webhooks",
    tag = "webhooks",
    summary = "Create a webhook",
    description = "Creates a webhook. When no secret is supplied one is generated; either way the secret is returned only here.",
    request_body = WebhookCreate,
    responses(
        (status = 201, description = "Webhook created", body = WebhookWithSecretResponse),
        (status = 400, description = "Invalid URL or event list"),
    )
)]
#[instrument(skip_all)]
pub async fn create_webhook(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<WebhookCreate>,
) -> Result<(StatusCode, Json<WebhookWithSecretResponse>)> {
    validate_url(&request.url)?;
    let events = request
        .events
        .unwrap_or_else(|| vec!["create".to_string(), "update".to_string(), "delete".to_string()]);
    validate_events(&events).map_err(Error::bad_request)?;

    let secret = request.secret.unwrap_or_else(crypto::generate_secret);

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let webhook = Webhooks::new(&mut conn)
        .create(&WebhookCreateDBRequest {
            url: request.url,
            secret: Some(secret),
            events,
            tables: request.tables.unwrap_or_default(),
            enabled: request.enabled,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(webhook.into())))
}

#[utoipa::path(
    get,
    path = "/api/webhooks",
    tag = "webhooks",
    summary = "List webhooks",
    responses((status = 200, description = "All webhooks", body = [WebhookResponse]))
)]
#[instrument(skip_all)]
pub async fn list_webhooks(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Result<Json<Vec<WebhookResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let webhooks = Webhooks::new(&mut conn).list().await?;
    Ok(Json(webhooks.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/webhooks/{id}",
    tag = "webhooks",
    summary = "Get a webhook",
    params(("id" = uuid::Uuid, Path, description = "Webhook ID")),
    responses(
        (status = 200, description = "The webhook", body = WebhookResponse),
        (status = 404, description = "Unknown webhook"),
    )
)]
#[instrument(skip_all)]
pub async fn get_webhook(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<WebhookId>,
) -> Result<Json<WebhookResponse>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let webhook = Webhooks::new(&mut conn)
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found("webhook", id))?;
    Ok(Json(webhook.into()))
}

#[utoipa::path(
    patch,
    path = "/api/webhooks/{id}",
    tag = "webhooks",
    summary = "Update a webhook",
    params(("id" = uuid::Uuid, Path, description = "Webhook ID")),
    request_body = WebhookUpdate,
    responses(
        (status = 200, description = "Updated webhook", body = WebhookResponse),
        (status = 404, description = "Unknown webhook"),
    )
)]
#[instrument(skip_all)]
pub async fn update_webhook(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<WebhookId>,
    Json(request): Json<WebhookUpdate>,
) -> Result<Json<WebhookResponse>> {
    if let Some(url) = &request.url {
        validate_url(url)?;
    }
    if let Some(events) = &request.events {
        validate_events(events).map_err(Error::bad_request)?;
    }

    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let webhook = Webhooks::new(&mut conn)
        .update(
            id,
            &WebhookUpdateDBRequest {
                url: request.url,
                secret: request.secret,
                events: request.events,
                tables: request.tables,
                enabled: request.enabled,
            },
        )
        .await?
        .ok_or_else(|| Error::not_found("webhook", id))?;
    Ok(Json(webhook.into()))
}

#[utoipa::path(
    delete,
    path = "/api/webhooks/{id}",
    tag = "webhooks",
    summary = "Delete a webhook",
    params(("id" = uuid::Uuid, Path, description = "Webhook ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown webhook"),
    )
)]
#[instrument(skip_all)]
pub async fn delete_webhook(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<WebhookId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    if !Webhooks::new(&mut conn).delete(id).await? {
        return Err(Error::not_found("webhook", id));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/webhooks/{id}/test",
    tag = "webhooks",
    summary = "Send a test delivery",
    description = "Performs one synchronous delivery with a fabricated payload and returns the raw outcome. Nothing is enqueued.",
    params(("id" = uuid::Uuid, Path, description = "Webhook ID")),
    responses(
        (status = 200, description = "Delivery outcome", body = DeliveryAttempt),
        (status = 404, description = "Unknown webhook"),
    )
)]
#[instrument(skip_all)]
pub async fn test_webhook(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<WebhookId>,
) -> Result<Json<DeliveryAttempt>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let webhook = Webhooks::new(&mut conn)
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found("webhook", id))?;
    drop(conn);

    let outcome = state.webhooks.test_delivery(&webhook).await?;
    Ok(Json(outcome))
}

#[utoipa::path(
    get,
    path = "/api/webhooks/{id}/deliveries",
    tag = "webhooks",
    summary = "List delivery audit rows",
    params(("id" = uuid::Uuid, Path, description = "Webhook ID"), Pagination),
    responses((status = 200, description = "Deliveries, newest first", body = [DeliveryResponse]))
)]
#[instrument(skip_all)]
pub async fn list_deliveries(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(id): Path<WebhookId>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<DeliveryResponse>>> {
    let mut conn = state.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
    let deliveries = Webhooks::new(&mut conn)
        .list_deliveries(id, pagination.limit(), pagination.skip())
        .await?;
    Ok(Json(deliveries.into_iter().map(Into::into).collect()))
}
