//! OpenAPI document aggregation, served at `/api-docs/openapi.json` and
//! rendered by Scalar at `/api/docs`.

use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Allyourbase API",
        description = "Backend-as-a-Service fronting PostgreSQL: collections, RPC, realtime, webhooks, jobs, schedules, materialized views, storage, email and SMS.",
    ),
    paths(
        handlers::collections::list_records,
        handlers::collections::create_record,
        handlers::collections::get_record,
        handlers::collections::update_record,
        handlers::collections::delete_record,
        handlers::collections::batch,
        handlers::rpc::invoke,
        handlers::realtime::subscribe,
        handlers::webhooks::create_webhook,
        handlers::webhooks::list_webhooks,
        handlers::webhooks::get_webhook,
        handlers::webhooks::update_webhook,
        handlers::webhooks::delete_webhook,
        handlers::webhooks::test_webhook,
        handlers::webhooks::list_deliveries,
        handlers::storage::upload,
        handlers::storage::download,
        handlers::storage::list,
        handlers::storage::delete,
        handlers::storage::sign,
        handlers::jobs::list_jobs,
        handlers::jobs::enqueue_job,
        handlers::jobs::job_stats,
        handlers::jobs::get_job,
        handlers::jobs::retry_job,
        handlers::jobs::cancel_job,
        handlers::schedules::create_schedule,
        handlers::schedules::list_schedules,
        handlers::schedules::get_schedule,
        handlers::schedules::update_schedule,
        handlers::schedules::enable_schedule,
        handlers::schedules::disable_schedule,
        handlers::schedules::delete_schedule,
        handlers::matviews::create_matview,
        handlers::matviews::list_matviews,
        handlers::matviews::get_matview,
        handlers::matviews::update_matview,
        handlers::matviews::delete_matview,
        handlers::matviews::refresh_matview,
        handlers::email_templates::list_templates,
        handlers::email_templates::get_template,
        handlers::email_templates::upsert_template,
        handlers::email_templates::delete_template,
        handlers::email_templates::preview_template,
        handlers::email_templates::send_email,
        handlers::sms::health,
        handlers::sms::list_messages,
        handlers::sms::send,
        handlers::users::create_user,
        handlers::users::list_users,
        handlers::users::get_user,
        handlers::users::update_user,
        handlers::users::delete_user,
        handlers::api_keys::create_api_key,
        handlers::api_keys::list_api_keys,
        handlers::api_keys::delete_api_key,
        handlers::apps::create_app,
        handlers::apps::list_apps,
        handlers::apps::get_app,
        handlers::apps::update_app,
        handlers::apps::delete_app,
        handlers::rls::list_policies,
        handlers::rls::table_status,
        handlers::rls::enable_rls,
        handlers::rls::disable_rls,
        handlers::rls::create_policy,
        handlers::rls::drop_policy,
        handlers::admin::status,
        handlers::admin::authenticate,
        handlers::admin::get_schema,
        handlers::admin::refresh_schema,
        handlers::admin::exec_sql,
        handlers::admin::list_replicated,
        handlers::admin::enable_replication,
        handlers::admin::disable_replication,
    ),
    components(schemas(
        models::admin::StatusResponse,
        models::admin::AuthRequest,
        models::admin::AuthResponse,
        models::admin::SqlExecRequest,
        models::admin::SqlExecResponse,
        models::admin::SchemaRefreshResponse,
        models::admin::ReplicationRequest,
        models::admin::ReplicatedTableResponse,
        models::api_keys::ApiKeyCreate,
        models::api_keys::ApiKeyResponse,
        models::api_keys::ApiKeyWithSecretResponse,
        models::apps::AppCreate,
        models::apps::AppUpdate,
        models::apps::AppResponse,
        models::collections::BatchRequest,
        models::email::TemplateUpsert,
        models::email::TemplatePreview,
        models::email::SendEmailRequest,
        models::email::TemplateResponse,
        models::email::TemplateListEntry,
        models::jobs::JobCreate,
        models::jobs::JobResponse,
        models::jobs::EnqueueResponse,
        models::matviews::MatviewCreate,
        models::matviews::MatviewUpdate,
        models::matviews::MatviewResponse,
        models::rls::PolicyCreate,
        models::rls::PolicyResponse,
        models::rls::RlsStatusResponse,
        models::schedules::ScheduleCreate,
        models::schedules::ScheduleUpdate,
        models::schedules::ScheduleResponse,
        models::sms::SendSmsRequest,
        models::sms::SmsMessageResponse,
        models::sms::SmsHealthResponse,
        models::users::UserCreate,
        models::users::UserUpdate,
        models::users::UserResponse,
        models::webhooks::WebhookCreate,
        models::webhooks::WebhookUpdate,
        models::webhooks::WebhookResponse,
        models::webhooks::WebhookWithSecretResponse,
        models::webhooks::DeliveryResponse,
        crate::collections::ListEnvelope,
        crate::collections::BatchOperation,
        crate::collections::BatchOperationResult,
        crate::db::models::jobs::JobState,
        crate::db::models::jobs::JobStats,
        crate::db::models::matviews::RefreshMode,
        crate::email::templates::Rendered,
        crate::storage::SignedUrl,
        crate::webhooks::service::DeliveryAttempt,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_builds_and_covers_the_core_surface() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).expect("document serializes");
        let paths = json["paths"].as_object().expect("paths object");
        for expected in [
            "/api/collections/{table}",
            "/api/collections/{table}/batch",
            "/api/rpc/{function_name}",
            "/api/realtime",
            "/api/webhooks/{id}/test",
            "/api/admin/jobs/stats",
            "/api/admin/matviews/{id}/refresh",
            "/api/admin/email/templates/{key}/preview",
            "/api/admin/sms/send",
        ] {
            assert!(paths.contains_key(expected), "missing path {expected}");
        }
    }
}
