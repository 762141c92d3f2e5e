//! HTTP surface: route table and handler modules.

pub mod handlers;
pub mod models;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::AppState;

/// Build the route table. Layers (trace, CORS, metrics) are applied by the
/// application setup.
pub fn router(state: AppState) -> Router {
    let collections = Router::new()
        .route(
            "/api/collections/{table}",
            get(handlers::collections::list_records).post(handlers::collections::create_record),
        )
        .route("/api/collections/{table}/batch", post(handlers::collections::batch))
        .route(
            "/api/collections/{table}/{id}",
            get(handlers::collections::get_record)
                .patch(handlers::collections::update_record)
                .delete(handlers::collections::delete_record),
        )
        .route("/api/rpc/{function_name}", post(handlers::rpc::invoke))
        .route("/api/realtime", get(handlers::realtime::subscribe));

    let storage = Router::new()
        .route(
            "/api/storage/{bucket}",
            get(handlers::storage::list).post(handlers::storage::upload),
        )
        .route(
            "/api/storage/{bucket}/{name}",
            get(handlers::storage::download).delete(handlers::storage::delete),
        )
        .route("/api/storage/{bucket}/{name}/sign", post(handlers::storage::sign));

    let webhooks = Router::new()
        .route(
            "/api/webhooks",
            get(handlers::webhooks::list_webhooks).post(handlers::webhooks::create_webhook),
        )
        .route(
            "/api/webhooks/{id}",
            get(handlers::webhooks::get_webhook)
                .patch(handlers::webhooks::update_webhook)
                .delete(handlers::webhooks::delete_webhook),
        )
        .route("/api/webhooks/{id}/test", post(handlers::webhooks::test_webhook))
        .route("/api/webhooks/{id}/deliveries", get(handlers::webhooks::list_deliveries));

    let admin = Router::new()
        .route("/api/admin/status", get(handlers::admin::status))
        .route("/api/admin/auth", post(handlers::admin::authenticate))
        .route("/api/schema", get(handlers::admin::get_schema))
        .route("/api/admin/schema/refresh", post(handlers::admin::refresh_schema))
        .route("/api/admin/sql", post(handlers::admin::exec_sql))
        .route("/api/admin/replication", get(handlers::admin::list_replicated))
        .route("/api/admin/replication/enable", post(handlers::admin::enable_replication))
        .route("/api/admin/replication/disable", post(handlers::admin::disable_replication))
        // Jobs
        .route("/api/admin/jobs", get(handlers::jobs::list_jobs).post(handlers::jobs::enqueue_job))
        .route("/api/admin/jobs/stats", get(handlers::jobs::job_stats))
        .route("/api/admin/jobs/{id}", get(handlers::jobs::get_job))
        .route("/api/admin/jobs/{id}/retry", post(handlers::jobs::retry_job))
        .route("/api/admin/jobs/{id}/cancel", post(handlers::jobs::cancel_job))
        // Schedules
        .route(
            "/api/admin/schedules",
            get(handlers::schedules::list_schedules).post(handlers::schedules::create_schedule),
        )
        .route(
            "/api/admin/schedules/{id}",
            get(handlers::schedules::get_schedule)
                .patch(handlers::schedules::update_schedule)
                .delete(handlers::schedules::delete_schedule),
        )
        .route("/api/admin/schedules/{id}/enable", post(handlers::schedules::enable_schedule))
        .route("/api/admin/schedules/{id}/disable", post(handlers::schedules::disable_schedule))
        // Matviews
        .route(
            "/api/admin/matviews",
            get(handlers::matviews::list_matviews).post(handlers::matviews::create_matview),
        )
        .route(
            "/api/admin/matviews/{id}",
            get(handlers::matviews::get_matview)
                .patch(handlers::matviews::update_matview)
                .delete(handlers::matviews::delete_matview),
        )
        .route("/api/admin/matviews/{id}/refresh", post(handlers::matviews::refresh_matview))
        // Email
        .route("/api/admin/email/templates", get(handlers::email_templates::list_templates))
        .route(
            "/api/admin/email/templates/{key}",
            get(handlers::email_templates::get_template)
                .put(handlers::email_templates::upsert_template)
                .delete(handlers::email_templates::delete_template),
        )
        .route(
            "/api/admin/email/templates/{key}/preview",
            post(handlers::email_templates::preview_template),
        )
        .route("/api/admin/email/send", post(handlers::email_templates::send_email))
        // SMS
        .route("/api/admin/sms/health", get(handlers::sms::health))
        .route("/api/admin/sms/messages", get(handlers::sms::list_messages))
        .route("/api/admin/sms/send", post(handlers::sms::send))
        // Users
        .route("/api/admin/users", get(handlers::users::list_users).post(handlers::users::create_user))
        .route(
            "/api/admin/users/{id}",
            get(handlers::users::get_user)
                .patch(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        // API keys
        .route(
            "/api/admin/api-keys",
            get(handlers::api_keys::list_api_keys).post(handlers::api_keys::create_api_key),
        )
        .route("/api/admin/api-keys/{id}", delete(handlers::api_keys::delete_api_key))
        // Apps
        .route("/api/admin/apps", get(handlers::apps::list_apps).post(handlers::apps::create_app))
        .route(
            "/api/admin/apps/{id}",
            get(handlers::apps::get_app)
                .patch(handlers::apps::update_app)
                .delete(handlers::apps::delete_app),
        )
        // RLS
        .route("/api/admin/rls", get(handlers::rls::list_policies))
        .route(
            "/api/admin/rls/{table}",
            get(handlers::rls::table_status).post(handlers::rls::create_policy),
        )
        .route("/api/admin/rls/{table}/enable", post(handlers::rls::enable_rls))
        .route("/api/admin/rls/{table}/disable", post(handlers::rls::disable_rls))
        .route("/api/admin/rls/{table}/{policy}", delete(handlers::rls::drop_policy));

    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(collections)
        .merge(storage)
        .merge(webhooks)
        .merge(admin)
        .with_state(state)
}
