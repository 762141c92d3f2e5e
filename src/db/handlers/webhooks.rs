//! Repository for webhook registrations and the delivery audit log.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::webhooks::{
    DeliveryCreateDBRequest, Webhook, WebhookCreateDBRequest, WebhookDelivery, WebhookUpdateDBRequest,
};
use crate::types::{abbrev_uuid, WebhookId};

pub struct Webhooks<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Webhooks<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), err)]
    pub async fn create(&mut self, request: &WebhookCreateDBRequest) -> Result<Webhook> {
        let webhook = sqlx::query_as::<_, Webhook>(
            r#"
            INSERT INTO _ayb_webhooks (url, secret, events, tables, enabled)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&request.url)
        .bind(&request.secret)
        .bind(serde_json::json!(request.events))
        .bind(serde_json::json!(request.tables))
        .bind(request.enabled)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(webhook)
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, id: WebhookId) -> Result<Option<Webhook>> {
        let webhook = sqlx::query_as::<_, Webhook>("SELECT * FROM _ayb_webhooks WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(webhook)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>("SELECT * FROM _ayb_webhooks ORDER BY created_at DESC")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(webhooks)
    }

    /// All enabled webhooks; the dispatcher filters by event and table.
    #[instrument(skip(self), err)]
    pub async fn list_enabled(&mut self) -> Result<Vec<Webhook>> {
        let webhooks = sqlx::query_as::<_, Webhook>("SELECT * FROM _ayb_webhooks WHERE enabled = true ORDER BY created_at")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(webhooks)
    }

    #[instrument(skip(self, request), fields(webhook_id = %abbrev_uuid(&id)), err)]
    pub async fn update(&mut self, id: WebhookId, request: &WebhookUpdateDBRequest) -> Result<Option<Webhook>> {
        let events_json = request.events.as_ref().map(|e| serde_json::json!(e));
        let tables_json = request.tables.as_ref().map(|t| serde_json::json!(t));
        let webhook = sqlx::query_as::<_, Webhook>(
            r#"
            UPDATE _ayb_webhooks
            SET url = COALESCE($2, url),
                enabled = COALESCE($3, enabled),
                events = COALESCE($4, events),
                tables = COALESCE($5, tables),
                secret = CASE WHEN $6::boolean THEN $7 ELSE secret END,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.url)
        .bind(request.enabled)
        .bind(events_json)
        .bind(tables_json)
        .bind(request.secret.is_some())
        .bind(request.secret.clone().flatten())
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(webhook)
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: WebhookId) -> Result<bool> {
        let done = sqlx::query("DELETE FROM _ayb_webhooks WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Record one delivery attempt, win or lose.
    #[instrument(skip(self, request), fields(webhook_id = %abbrev_uuid(&request.webhook_id)), err)]
    pub async fn record_delivery(&mut self, request: &DeliveryCreateDBRequest) -> Result<WebhookDelivery> {
        let delivery = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            INSERT INTO _ayb_webhook_deliveries
                (webhook_id, event_action, event_table, success, status_code, attempt, duration_ms,
                 error, request_body, response_body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(request.webhook_id)
        .bind(&request.event_action)
        .bind(&request.event_table)
        .bind(request.success)
        .bind(request.status_code)
        .bind(request.attempt)
        .bind(request.duration_ms)
        .bind(&request.error)
        .bind(&request.request_body)
        .bind(&request.response_body)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(delivery)
    }

    #[instrument(skip(self), fields(webhook_id = %abbrev_uuid(&id)), err)]
    pub async fn list_deliveries(&mut self, id: WebhookId, limit: i64, offset: i64) -> Result<Vec<WebhookDelivery>> {
        let deliveries = sqlx::query_as::<_, WebhookDelivery>(
            r#"
            SELECT * FROM _ayb_webhook_deliveries
            WHERE webhook_id = $1
            ORDER BY delivered_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(deliveries)
    }
}
