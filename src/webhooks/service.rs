//! Webhook matching, delivery and the queue-driven retry path.
//!
//! The dispatcher task consumes the realtime bus. For each change event it
//! enumerates enabled webhooks whose event/table filters match and enqueues a
//! `webhook.deliver` job per match — delivery never happens inline, so a slow
//! target cannot stall event fan-out. The job handler performs one HTTP
//! attempt, records an audit row win or lose, and classifies the outcome so
//! the queue's backoff policy drives retries.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::db::errors::DbError;
use crate::db::handlers::Webhooks;
use crate::db::models::webhooks::{DeliveryCreateDBRequest, Webhook, WebhookDelivery};
use crate::errors::{Error, Result};
use crate::jobs::{EnqueueOptions, JobContext, JobError, JobHandler, JobQueue};
use crate::realtime::{ChangeEvent, RealtimeBus};
use crate::types::{ChangeAction, WebhookId};
use crate::webhooks::signing;

/// Job type for queued deliveries.
pub const WEBHOOK_DELIVER_JOB: &str = "webhook.deliver";

/// Payload of a `webhook.deliver` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverPayload {
    pub webhook_id: WebhookId,
    pub action: ChangeAction,
    pub table: String,
    pub record: serde_json::Value,
}

/// Wire body posted to the target.
#[derive(Debug, Serialize)]
struct WireBody<'a> {
    action: &'a str,
    table: &'a str,
    record: &'a serde_json::Value,
    ts: chrono::DateTime<Utc>,
}

/// Raw result of one HTTP attempt.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct DeliveryAttempt {
    pub success: bool,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

#[derive(Clone)]
pub struct WebhookService {
    pool: PgPool,
    http: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookService {
    pub fn new(pool: PgPool, config: WebhookConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("webhook HTTP client construction cannot fail with static options");
        Self { pool, http, config }
    }

    /// Bus consumer: match events against enabled webhooks and enqueue one
    /// delivery job per match.
    pub async fn run_dispatcher(self, bus: RealtimeBus, queue: JobQueue, shutdown: CancellationToken) {
        let mut rx = bus.subscribe();
        tracing::info!("Webhook dispatcher started");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Webhook dispatcher lagged behind the bus");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            };

            if let Err(e) = self.dispatch_event(&queue, &event).await {
                tracing::warn!(change_id = event.id, error = %e, "Failed to dispatch change event to webhooks");
            }
        }
        tracing::info!("Webhook dispatcher stopped");
    }

    async fn dispatch_event(&self, queue: &JobQueue, event: &ChangeEvent) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let hooks = Webhooks::new(&mut conn).list_enabled().await?;
        drop(conn);

        for hook in hooks.iter().filter(|h| h.matches(event.action, &event.table)) {
            let payload = DeliverPayload {
                webhook_id: hook.id,
                action: event.action,
                table: event.table.clone(),
                record: event.record.clone(),
            };
            let payload = serde_json::to_value(&payload).map_err(|e| Error::Other(e.into()))?;
            // The catch-up poll can republish an event the notify path already
            // delivered; the idempotency key collapses the duplicate.
            let opts = EnqueueOptions {
                idempotency_key: Some(format!("wh:{}:{}", hook.id, event.id)),
                max_attempts: Some(self.config.max_attempts),
                ..EnqueueOptions::default()
            };
            queue.enqueue(WEBHOOK_DELIVER_JOB, payload, opts).await?;
        }
        Ok(())
    }

    /// One HTTP delivery attempt. Never errors — every outcome, including
    /// network failure, is data.
    #[instrument(skip(self, webhook, record), fields(webhook_id = %crate::types::abbrev_uuid(&webhook.id)))]
    pub async fn attempt_delivery(
        &self,
        webhook: &Webhook,
        action: ChangeAction,
        table: &str,
        record: &serde_json::Value,
        attempt: i32,
    ) -> (DeliveryAttempt, String) {
        let body = serde_json::to_string(&WireBody {
            action: action.as_str(),
            table,
            record,
            ts: Utc::now(),
        })
        .unwrap_or_else(|_| "{}".to_string());

        let mut request = self
            .http
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-AYB-Delivery", Uuid::new_v4().to_string())
            .header("X-AYB-Attempt", attempt.to_string());
        if let Some(secret) = &webhook.secret {
            request = request.header("X-AYB-Signature", signing::sign_body(secret, body.as_bytes()));
        }

        let started = Instant::now();
        let outcome = match request.body(body.clone()).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let response_body = response
                    .text()
                    .await
                    .ok()
                    .map(|t| truncate(&t, self.config.max_body_capture));
                DeliveryAttempt {
                    success: (200..300).contains(&status),
                    status_code: Some(status),
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: if (200..300).contains(&status) {
                        None
                    } else {
                        Some(format!("HTTP {status}"))
                    },
                    response_body,
                }
            }
            Err(e) => DeliveryAttempt {
                success: false,
                status_code: e.status().map(|s| s.as_u16()),
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
                response_body: None,
            },
        };

        let metric = if outcome.success { "success" } else { "failure" };
        metrics::counter!("ayb_webhook_deliveries_total", "outcome" => metric).increment(1);

        (outcome, body)
    }

    /// Whether a failed attempt should be retried: network errors, timeouts
    /// and 5xx always; 4xx only when configured.
    pub fn is_retryable(&self, attempt: &DeliveryAttempt) -> bool {
        match attempt.status_code {
            None => true,
            Some(status) if status >= 500 => true,
            Some(status) if (400..500).contains(&status) => self.config.retry_on_4xx.contains(&status),
            Some(_) => false,
        }
    }

    /// Persist an audit row for an attempt.
    pub async fn record_attempt(
        &self,
        webhook_id: WebhookId,
        action: ChangeAction,
        table: &str,
        attempt_no: i32,
        outcome: &DeliveryAttempt,
        request_body: &str,
    ) -> Result<WebhookDelivery> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let delivery = Webhooks::new(&mut conn)
            .record_delivery(&DeliveryCreateDBRequest {
                webhook_id,
                event_action: action.as_str().to_string(),
                event_table: table.to_string(),
                success: outcome.success,
                status_code: outcome.status_code.map(i32::from),
                attempt: attempt_no,
                duration_ms: outcome.duration_ms as i64,
                error: outcome.error.clone(),
                request_body: Some(truncate(request_body, self.config.max_body_capture)),
                response_body: outcome.response_body.clone(),
            })
            .await?;
        Ok(delivery)
    }

    /// Synchronous test delivery with a fabricated payload; records the
    /// attempt with `attempt = 0` and returns the raw outcome. No enqueue.
    pub async fn test_delivery(&self, webhook: &Webhook) -> Result<DeliveryAttempt> {
        let record = serde_json::json!({
            "id": Uuid::new_v4().to_string(),
            "test": true,
        });
        let (outcome, body) = self
            .attempt_delivery(webhook, ChangeAction::Create, "_test", &record, 0)
            .await;
        self.record_attempt(webhook.id, ChangeAction::Create, "_test", 0, &outcome, &body)
            .await?;
        Ok(outcome)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Queue handler for `webhook.deliver` jobs.
pub struct WebhookDeliverHandler {
    service: Arc<WebhookService>,
}

impl WebhookDeliverHandler {
    pub fn new(service: Arc<WebhookService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for WebhookDeliverHandler {
    fn job_type(&self) -> &'static str {
        WEBHOOK_DELIVER_JOB
    }

    async fn run(&self, ctx: &JobContext, payload: serde_json::Value) -> std::result::Result<(), JobError> {
        let payload: DeliverPayload =
            serde_json::from_value(payload).map_err(|e| JobError::permanent(anyhow::anyhow!("bad delivery payload: {e}")))?;

        let mut conn = ctx
            .pool
            .acquire()
            .await
            .map_err(|e| JobError::retryable(anyhow::anyhow!("acquire connection: {e}")))?;
        let webhook = Webhooks::new(&mut conn)
            .get(payload.webhook_id)
            .await
            .map_err(|e| JobError::retryable(anyhow::anyhow!("load webhook: {e}")))?;
        drop(conn);

        // Deleted or disabled since the event fired: nothing left to deliver.
        let Some(webhook) = webhook.filter(|w| w.enabled) else {
            tracing::debug!(webhook_id = %payload.webhook_id, "Webhook gone or disabled, dropping delivery");
            return Ok(());
        };

        let (outcome, body) = self
            .service
            .attempt_delivery(&webhook, payload.action, &payload.table, &payload.record, ctx.attempt)
            .await;

        if let Err(e) = self
            .service
            .record_attempt(webhook.id, payload.action, &payload.table, ctx.attempt, &outcome, &body)
            .await
        {
            tracing::warn!(webhook_id = %webhook.id, error = %e, "Failed to record delivery audit row");
        }

        if outcome.success {
            return Ok(());
        }

        let error = anyhow::anyhow!(
            "delivery to {} failed: {}",
            webhook.url,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        if self.service.is_retryable(&outcome) {
            Err(JobError::retryable(error))
        } else {
            Err(JobError::permanent(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(config: WebhookConfig) -> WebhookService {
        // The pool is lazy; tests here never touch the database.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        WebhookService::new(pool, config)
    }

    fn webhook(url: &str, secret: Option<&str>) -> Webhook {
        Webhook {
            id: Uuid::new_v4(),
            url: url.to_string(),
            secret: secret.map(str::to_string),
            events: serde_json::json!(["create", "update", "delete"]),
            tables: serde_json::json!([]),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn successful_delivery_reports_status_and_duration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(WebhookConfig::default());
        let hook = webhook(&format!("{}/hook", server.uri()), None);
        let (outcome, body) = svc
            .attempt_delivery(&hook, ChangeAction::Create, "votes", &serde_json::json!({"id": "a"}), 1)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.response_body.as_deref(), Some("ok"));
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["action"], "create");
        assert_eq!(parsed["table"], "votes");
        assert_eq!(parsed["record"]["id"], "a");
        assert!(parsed["ts"].is_string());
    }

    #[tokio::test]
    async fn secret_adds_a_verifiable_signature_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("X-AYB-Signature"))
            .and(header_exists("X-AYB-Delivery"))
            .and(header_exists("X-AYB-Attempt"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service(WebhookConfig::default());
        let hook = webhook(&server.uri(), Some("shh"));
        let (outcome, body) = svc
            .attempt_delivery(&hook, ChangeAction::Update, "votes", &serde_json::json!({}), 2)
            .await;
        assert!(outcome.success);

        // The signature covers the exact body bytes.
        let expected = signing::sign_body("shh", body.as_bytes());
        let received = server.received_requests().await.unwrap();
        let header = received[0].headers.get("X-AYB-Signature").unwrap().to_str().unwrap();
        assert_eq!(header, expected);
    }

    #[test_log::test(tokio::test)]
    async fn network_failure_is_captured_not_raised() {
        let svc = service(WebhookConfig {
            timeout: Duration::from_millis(500),
            ..WebhookConfig::default()
        });
        let hook = webhook("http://127.0.0.1:1/unreachable", None);
        let (outcome, _) = svc
            .attempt_delivery(&hook, ChangeAction::Delete, "votes", &serde_json::json!({}), 1)
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert!(svc.is_retryable(&outcome));
    }

    #[tokio::test]
    async fn retry_classification_follows_the_status_taxonomy() {
        let svc = service(WebhookConfig::default());
        let attempt = |status: Option<u16>| DeliveryAttempt {
            success: false,
            status_code: status,
            duration_ms: 1,
            error: None,
            response_body: None,
        };
        assert!(svc.is_retryable(&attempt(None)));
        assert!(svc.is_retryable(&attempt(Some(500))));
        assert!(svc.is_retryable(&attempt(Some(503))));
        assert!(svc.is_retryable(&attempt(Some(429))));
        assert!(svc.is_retryable(&attempt(Some(408))));
        assert!(!svc.is_retryable(&attempt(Some(404))));
        assert!(!svc.is_retryable(&attempt(Some(400))));
        assert!(!svc.is_retryable(&attempt(Some(410))));
    }

    #[test]
    fn response_bodies_are_truncated_to_the_capture_limit() {
        assert_eq!(truncate("abcdef", 4), "abcd");
        assert_eq!(truncate("ab", 4), "ab");
        // Never split a multi-byte character.
        let s = "aé".repeat(10);
        let t = truncate(&s, 4);
        assert!(t.len() <= 4);
        assert!(s.starts_with(&t));
    }
}
