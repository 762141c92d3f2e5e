//! Realtime event bus.
//!
//! One long-lived listener task consumes the `ayb_changes` NOTIFY channel and
//! additionally polls the change log at a bounded interval as a catch-up for
//! missed notifications. Events fan out through a bounded broadcast channel:
//! every subscriber owns an independent cursor, slow subscribers drop the
//! oldest events and observe the gap as a `lagged` marker, and a subscriber
//! going away never stalls the bus.
//!
//! Ordering: the change log assigns a monotonically increasing id at commit
//! time and the bus publishes strictly in id order, so events for the same
//! (table, primary key) reach any single subscriber in commit order.

use std::sync::Arc;

use serde::Serialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::{RealtimeConfig, CHANGELOG_CHANNEL};
use crate::db::handlers::Changelog;
use crate::db::models::changelog::ChangeRow;
use crate::types::ChangeAction;

/// Rows fetched per catch-up batch.
const CATCHUP_BATCH: i64 = 500;

/// A change event as fanned out to subscribers and the webhook dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    /// Change-log id; monotone, gap-free per publish order
    pub id: i64,
    pub action: ChangeAction,
    pub schema: String,
    pub table: String,
    /// New row for create/update, old row for delete
    pub record: serde_json::Value,
}

impl ChangeEvent {
    fn from_row(row: ChangeRow) -> Option<Self> {
        let action: ChangeAction = row.action.parse().ok()?;
        let record = match action {
            ChangeAction::Delete => row.old_record,
            _ => row.record,
        }?;
        Some(Self {
            id: row.id,
            action,
            schema: row.schema_name,
            table: row.table_name,
            record,
        })
    }

    /// Table key used for subscriber matching: bare name and `schema.table`
    /// both match.
    pub fn matches_table(&self, wanted: &str) -> bool {
        wanted == self.table || wanted == format!("{}.{}", self.schema, self.table)
    }

    /// Text form of the record's value for `pk_column`, for visibility probes.
    pub fn primary_key_text(&self, pk_column: &str) -> Option<String> {
        match self.record.get(pk_column)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Fan-out hub. Cheap to clone; all clones share the broadcast channel.
#[derive(Clone)]
pub struct RealtimeBus {
    tx: broadcast::Sender<Arc<ChangeEvent>>,
}

impl RealtimeBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    /// New subscriber cursor. Dropping the receiver is the cancel handle;
    /// dropping the last one does not tear down the listener.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChangeEvent) {
        metrics::counter!("ayb_realtime_events_total", "action" => event.action.as_str()).increment(1);
        // Send only fails with zero receivers, which is fine.
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Long-lived listener: LISTEN on the change channel, with interval polling
/// as the missed-notification backstop. Publishes strictly in change-id
/// order starting from the log's current tail.
pub async fn run_listener(pool: PgPool, bus: RealtimeBus, config: RealtimeConfig, shutdown: CancellationToken) {
    let mut last_id = match initial_cursor(&pool).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "Realtime listener could not read the change-log tail");
            0
        }
    };

    let mut listener: Option<PgListener> = None;
    tracing::info!(last_id, "Realtime listener started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        if listener.is_none() {
            match PgListener::connect_with(&pool).await {
                Ok(mut l) => match l.listen(CHANGELOG_CHANNEL).await {
                    Ok(()) => {
                        tracing::debug!(channel = CHANGELOG_CHANNEL, "Realtime listener attached");
                        listener = Some(l);
                    }
                    Err(e) => tracing::warn!(error = %e, "LISTEN failed, relying on polling"),
                },
                Err(e) => tracing::warn!(error = %e, "Could not connect change listener, relying on polling"),
            }
        }

        enum Wake {
            Notify,
            Poll,
            Reconnect,
        }

        let wake = match listener.as_mut() {
            Some(l) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => Wake::Poll,
                    received = l.try_recv() => match received {
                        Ok(Some(_notification)) => Wake::Notify,
                        Ok(None) => {
                            tracing::debug!("Change listener connection dropped, reconnecting");
                            Wake::Reconnect
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Change listener receive failed, reconnecting");
                            Wake::Reconnect
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => Wake::Poll,
                }
            }
        };
        if matches!(wake, Wake::Reconnect) {
            listener = None;
        }
        let woke_by_notify = matches!(wake, Wake::Notify);

        match drain_changes(&pool, &bus, last_id).await {
            Ok(new_last) => last_id = new_last,
            Err(e) => {
                if woke_by_notify {
                    tracing::warn!(error = %e, "Failed to drain change log after NOTIFY");
                } else {
                    tracing::debug!(error = %e, "Change-log poll failed");
                }
            }
        }
    }

    tracing::info!("Realtime listener stopped");
}

async fn initial_cursor(pool: &PgPool) -> crate::db::errors::Result<i64> {
    let mut conn = pool.acquire().await.map_err(crate::db::errors::DbError::from)?;
    Changelog::new(&mut conn).latest_id().await
}

/// Publish everything after `last_id`, in order; returns the new cursor.
async fn drain_changes(pool: &PgPool, bus: &RealtimeBus, mut last_id: i64) -> crate::db::errors::Result<i64> {
    let mut conn = pool.acquire().await.map_err(crate::db::errors::DbError::from)?;
    loop {
        let rows = Changelog::new(&mut conn).fetch_since(last_id, CATCHUP_BATCH).await?;
        if rows.is_empty() {
            return Ok(last_id);
        }
        for row in rows {
            last_id = row.id;
            match ChangeEvent::from_row(row) {
                Some(event) => bus.publish(event),
                None => tracing::debug!(id = last_id, "Skipping malformed change row"),
            }
        }
    }
}

/// Job type for change-log retention pruning.
pub const CHANGELOG_PRUNE_JOB: &str = "changelog.prune";

/// Queue handler deleting change rows older than the retention window. Runs
/// off a seeded system schedule.
pub struct ChangelogPruneHandler {
    retention: std::time::Duration,
}

impl ChangelogPruneHandler {
    pub fn new(retention: std::time::Duration) -> Self {
        Self { retention }
    }
}

#[async_trait::async_trait]
impl crate::jobs::JobHandler for ChangelogPruneHandler {
    fn job_type(&self) -> &'static str {
        CHANGELOG_PRUNE_JOB
    }

    async fn run(&self, ctx: &crate::jobs::JobContext, _payload: serde_json::Value) -> Result<(), crate::jobs::JobError> {
        let mut conn = ctx
            .pool
            .acquire()
            .await
            .map_err(|e| crate::jobs::JobError::retryable(anyhow::anyhow!("acquire connection: {e}")))?;
        let pruned = Changelog::new(&mut conn)
            .prune(self.retention.as_secs_f64())
            .await
            .map_err(|e| crate::jobs::JobError::retryable(anyhow::anyhow!("prune change log: {e}")))?;
        if pruned > 0 {
            tracing::info!(pruned, "Pruned old change-log rows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: i64, table: &str) -> ChangeEvent {
        ChangeEvent {
            id,
            action: ChangeAction::Create,
            schema: "public".to_string(),
            table: table.to_string(),
            record: json!({"id": format!("r{id}"), "user_id": "u"}),
        }
    }

    #[test]
    fn change_rows_project_the_right_record_side() {
        let created = ChangeEvent::from_row(ChangeRow {
            id: 1,
            ts: Utc::now(),
            action: "create".to_string(),
            schema_name: "public".to_string(),
            table_name: "votes".to_string(),
            record: Some(json!({"id": "a"})),
            old_record: None,
        })
        .unwrap();
        assert_eq!(created.record, json!({"id": "a"}));

        let deleted = ChangeEvent::from_row(ChangeRow {
            id: 2,
            ts: Utc::now(),
            action: "delete".to_string(),
            schema_name: "public".to_string(),
            table_name: "votes".to_string(),
            record: None,
            old_record: Some(json!({"id": "b"})),
        })
        .unwrap();
        assert_eq!(deleted.record, json!({"id": "b"}));

        let malformed = ChangeEvent::from_row(ChangeRow {
            id: 3,
            ts: Utc::now(),
            action: "vacuum".to_string(),
            schema_name: "public".to_string(),
            table_name: "votes".to_string(),
            record: Some(json!({})),
            old_record: None,
        });
        assert!(malformed.is_none());
    }

    #[test]
    fn table_matching_accepts_bare_and_qualified_names() {
        let e = event(1, "votes");
        assert!(e.matches_table("votes"));
        assert!(e.matches_table("public.votes"));
        assert!(!e.matches_table("polls"));
        assert!(!e.matches_table("app.votes"));
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = RealtimeBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(event(1, "votes"));
        bus.publish(event(2, "polls"));
        assert_eq!(rx.recv().await.unwrap().id, 1);
        assert_eq!(rx.recv().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn events_are_delivered_even_to_the_writers_own_subscriber() {
        // Optimistic-write dedup is a client concern; the bus never
        // suppresses an event based on who caused it.
        let bus = RealtimeBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(event(7, "votes"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.record["user_id"], json!("u"));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_reports_lag() {
        let bus = RealtimeBus::new(4);
        let mut rx = bus.subscribe();
        for i in 0..10 {
            bus.publish(event(i, "votes"));
        }
        // The first receive observes the gap...
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed > 0),
            other => panic!("expected lag, got {other:?}"),
        }
        // ...and the stream resumes with the newest retained events, in order.
        let next = rx.recv().await.unwrap();
        assert!(next.id >= 6);
        let after = rx.recv().await.unwrap();
        assert_eq!(after.id, next.id + 1);
    }

    #[tokio::test]
    async fn dropping_a_receiver_is_an_idempotent_cancel() {
        let bus = RealtimeBus::new(4);
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
        drop(rx2);
        assert_eq!(bus.subscriber_count(), 0);
        // Publishing with no subscribers is fine.
        bus.publish(event(1, "votes"));
    }
}
