//! Database models for webhook configuration and delivery auditing.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{ChangeAction, DeliveryId, WebhookId};

/// Database model for a webhook registration.
#[derive(Debug, Clone, FromRow)]
pub struct Webhook {
    pub id: WebhookId,
    pub url: String,
    pub secret: Option<String>,
    /// JSON array, subset of `["create","update","delete"]`
    pub events: serde_json::Value,
    /// JSON array of table names; empty means all tables
    pub tables: serde_json::Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn event_list(&self) -> Vec<String> {
        json_string_list(&self.events)
    }

    pub fn table_list(&self) -> Vec<String> {
        json_string_list(&self.tables)
    }

    /// Whether this webhook wants the given change event.
    pub fn matches(&self, action: ChangeAction, table: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.event_list().iter().any(|e| e == action.as_str()) {
            return false;
        }
        let tables = self.table_list();
        tables.is_empty() || tables.iter().any(|t| t == table)
    }
}

fn json_string_list(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Append-only audit row for one delivery attempt.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub webhook_id: WebhookId,
    pub event_action: String,
    pub event_table: String,
    pub success: bool,
    pub status_code: Option<i32>,
    pub attempt: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WebhookCreateDBRequest {
    pub url: String,
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub tables: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WebhookUpdateDBRequest {
    pub url: Option<String>,
    pub secret: Option<Option<String>>,
    pub events: Option<Vec<String>>,
    pub tables: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DeliveryCreateDBRequest {
    pub webhook_id: WebhookId,
    pub event_action: String,
    pub event_table: String,
    pub success: bool,
    pub status_code: Option<i32>,
    pub attempt: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn webhook(enabled: bool, events: serde_json::Value, tables: serde_json::Value) -> Webhook {
        Webhook {
            id: uuid::Uuid::new_v4(),
            url: "https://example.com/hook".to_string(),
            secret: None,
            events,
            tables,
            enabled,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn matching_honors_action_and_table_filters() {
        let hook = webhook(true, json!(["create", "delete"]), json!(["votes"]));
        assert!(hook.matches(ChangeAction::Create, "votes"));
        assert!(!hook.matches(ChangeAction::Update, "votes"));
        assert!(!hook.matches(ChangeAction::Create, "polls"));
    }

    #[test]
    fn empty_table_list_matches_all_tables() {
        let hook = webhook(true, json!(["update"]), json!([]));
        assert!(hook.matches(ChangeAction::Update, "anything"));
    }

    #[test]
    fn disabled_webhooks_never_match() {
        let hook = webhook(false, json!(["create"]), json!([]));
        assert!(!hook.matches(ChangeAction::Create, "votes"));
    }

    #[test]
    fn malformed_event_json_matches_nothing() {
        let hook = webhook(true, json!("create"), json!([]));
        assert!(!hook.matches(ChangeAction::Create, "votes"));
    }
}
