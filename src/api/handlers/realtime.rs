//! Realtime subscriptions over Server-Sent Events.
//!
//! `GET /api/realtime?tables=a,b` attaches a subscriber to the bus with the
//! request's identity. Each event is re-checked against row-level security by
//! probing the row's primary key with the subscriber's session; events whose
//! probe comes back empty are skipped. A subscriber that falls behind the
//! bounded buffer drops the oldest events and sees `"lagged": true` on the
//! next event it does receive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use sqlx::Row;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::instrument;
use utoipa::IntoParams;

use crate::{
    auth::CurrentIdentity,
    collections::sql::SqlBuilder,
    errors::{Error, Result},
    realtime::ChangeEvent,
    session::{Identity, RequestSession},
    types::ChangeAction,
    AppState,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct RealtimeParams {
    /// Comma list of tables to subscribe to
    pub tables: String,
}

#[utoipa::path(
    get,
    path = "/api/realtime",
    tag = "realtime",
    summary = "Subscribe to change events",
    description = "Server-Sent Events stream of `{action, table, record}` for the requested tables, filtered by the subscriber's row-level security.",
    params(RealtimeParams),
    responses(
        (status = 200, description = "SSE stream of change events"),
        (status = 400, description = "No tables requested"),
    )
)]
#[instrument(skip_all, fields(tables = %params.tables))]
pub async fn subscribe(
    State(state): State<AppState>,
    Query(params): Query<RealtimeParams>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, std::convert::Infallible>>>> {
    let tables: Vec<String> = params
        .tables
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if tables.is_empty() {
        return Err(Error::bad_request("at least one table is required"));
    }

    let rx = state.bus.subscribe();
    let lagged = Arc::new(AtomicBool::new(false));

    let stream = BroadcastStream::new(rx)
        .then(move |item| {
            let state = state.clone();
            let identity = identity.clone();
            let tables = tables.clone();
            let lagged = lagged.clone();
            async move {
                let event = match item {
                    Ok(event) => event,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "Realtime subscriber lagged");
                        lagged.store(true, Ordering::Relaxed);
                        return None;
                    }
                };

                if !tables.iter().any(|t| event.matches_table(t)) {
                    return None;
                }

                if !event_visible(&state, &identity, &event).await {
                    return None;
                }

                let mut payload = serde_json::json!({
                    "action": event.action,
                    "table": event.table.clone(),
                    "record": event.record.clone(),
                });
                if lagged.swap(false, Ordering::Relaxed) {
                    payload["lagged"] = serde_json::json!(true);
                }
                Some(Ok(Event::default().event("change").data(payload.to_string())))
            }
        })
        .filter_map(|opt| async move { opt });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)).text("ping")))
}

/// Re-check row-level security for one event with the subscriber's identity.
///
/// Create and update events probe the row's primary key with a SELECT on the
/// subscriber's session; an empty result hides the event. Privileged
/// subscribers skip the probe. Delete events cannot be probed after the fact
/// and are delivered as-is. Probe failures fail closed.
async fn event_visible(state: &AppState, identity: &Identity, event: &ChangeEvent) -> bool {
    if identity.is_privileged() || !state.auth.auth_enabled() {
        return true;
    }
    if event.action == ChangeAction::Delete {
        return true;
    }

    let snapshot = state.schema.current();
    let Some(table) = snapshot.get_table(&event.schema, &event.table) else {
        return false;
    };
    let Some(pk) = table.single_pk() else {
        return false;
    };
    let Some(pk_value) = event.primary_key_text(pk) else {
        return false;
    };

    let probe = match SqlBuilder::new(table).build_visibility_probe(&pk_value) {
        Ok(probe) => probe,
        Err(_) => return false,
    };

    let Ok(mut session) = RequestSession::begin(&state.db, identity).await else {
        return false;
    };
    let mut query = sqlx::query(&probe.sql);
    for param in &probe.params {
        query = query.bind(param.clone());
    }
    let visible = match query.fetch_optional(session.conn()).await {
        Ok(Some(row)) => row.try_get::<i32, _>("one").is_ok(),
        Ok(None) => false,
        Err(e) => {
            tracing::debug!(error = %e, "Visibility probe failed; hiding event");
            false
        }
    };
    let _ = session.commit().await;
    visible
}
