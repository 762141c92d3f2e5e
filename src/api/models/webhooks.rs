//! API models for webhook endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::webhooks::{Webhook, WebhookDelivery};
use crate::types::{DeliveryId, WebhookId};

/// Valid event names for webhook subscriptions.
pub const VALID_EVENTS: &[&str] = &["create", "update", "delete"];

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WebhookCreate {
    /// Target URL for deliveries
    pub url: String,
    /// Events to deliver; defaults to all three
    #[serde(default)]
    pub events: Option<Vec<String>>,
    /// Tables to deliver for; empty means all tables
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    /// Optional signing secret; omitted means one is generated
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WebhookUpdate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Double-option: absent leaves the secret, `null` clears it
    #[serde(default)]
    pub secret: Option<Option<String>>,
}

/// Webhook representation without the secret.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: WebhookId,
    pub url: String,
    pub events: Vec<String>,
    pub tables: Vec<String>,
    pub enabled: bool,
    pub has_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Webhook> for WebhookResponse {
    fn from(webhook: Webhook) -> Self {
        Self {
            events: webhook.event_list(),
            tables: webhook.table_list(),
            id: webhook.id,
            url: webhook.url,
            enabled: webhook.enabled,
            has_secret: webhook.secret.is_some(),
            created_at: webhook.created_at,
            updated_at: webhook.updated_at,
        }
    }
}

/// Create response: the only time the secret is returned.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookWithSecretResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: WebhookId,
    pub url: String,
    pub events: Vec<String>,
    pub tables: Vec<String>,
    pub enabled: bool,
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Webhook> for WebhookWithSecretResponse {
    fn from(webhook: Webhook) -> Self {
        Self {
            events: webhook.event_list(),
            tables: webhook.table_list(),
            id: webhook.id,
            url: webhook.url,
            enabled: webhook.enabled,
            secret: webhook.secret,
            created_at: webhook.created_at,
            updated_at: webhook.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DeliveryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: DeliveryId,
    #[schema(value_type = String, format = "uuid")]
    pub webhook_id: WebhookId,
    pub event_action: String,
    pub event_table: String,
    pub success: bool,
    pub status_code: Option<i32>,
    pub attempt: i32,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

impl From<WebhookDelivery> for DeliveryResponse {
    fn from(delivery: WebhookDelivery) -> Self {
        Self {
            id: delivery.id,
            webhook_id: delivery.webhook_id,
            event_action: delivery.event_action,
            event_table: delivery.event_table,
            success: delivery.success,
            status_code: delivery.status_code,
            attempt: delivery.attempt,
            duration_ms: delivery.duration_ms,
            error: delivery.error,
            delivered_at: delivery.delivered_at,
        }
    }
}

/// Validate event names from a create/update request.
pub fn validate_events(events: &[String]) -> Result<(), String> {
    for event in events {
        if !VALID_EVENTS.contains(&event.as_str()) {
            return Err(format!("invalid event {event}; valid events are create, update, delete"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_validation_accepts_only_the_three_actions() {
        assert!(validate_events(&["create".to_string(), "delete".to_string()]).is_ok());
        assert!(validate_events(&[]).is_ok());
        assert!(validate_events(&["truncate".to_string()]).is_err());
    }
}
