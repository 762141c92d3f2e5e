//! Email template administration handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    api::models::email::{SendEmailRequest, TemplateListEntry, TemplatePreview, TemplateResponse, TemplateUpsert},
    auth::RequireAdmin,
    email::templates::{builtin_keys, Rendered},
    errors::{Error, Result},
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/admin/email/templates",
    tag = "email",
    summary = "List templates",
    description = "Stored overrides plus built-ins without an override.",
    responses((status = 200, description = "Template keys with override/built-in flags", body = [TemplateListEntry]))
)]
#[instrument(skip_all)]
pub async fn list_templates(State(state): State<AppState>, RequireAdmin(_identity): RequireAdmin) -> Result<Json<Vec<TemplateListEntry>>> {
    let stored = state.email.templates().list().await?;
    let mut entries: Vec<TemplateListEntry> = stored
        .iter()
        .map(|t| TemplateListEntry {
            template_key: t.template_key.clone(),
            overridden: true,
            enabled: t.enabled,
            builtin: builtin_keys().contains(&t.template_key.as_str()),
        })
        .collect();
    for key in builtin_keys() {
        if !stored.iter().any(|t| t.template_key == *key) {
            entries.push(TemplateListEntry {
                template_key: key.to_string(),
                overridden: false,
                enabled: true,
                builtin: true,
            });
        }
    }
    entries.sort_by(|a, b| a.template_key.cmp(&b.template_key));
    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/api/admin/email/templates/{key}",
    tag = "email",
    summary = "Get a stored override",
    params(("key" = String, Path, description = "Template key")),
    responses(
        (status = 200, description = "The stored override", body = TemplateResponse),
        (status = 404, description = "No override stored for the key"),
    )
)]
#[instrument(skip_all, fields(key = %key))]
pub async fn get_template(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(key): Path<String>,
) -> Result<Json<TemplateResponse>> {
    let template = state
        .email
        .templates()
        .get(&key)
        .await?
        .ok_or_else(|| Error::not_found("email template", &key))?;
    Ok(Json(template.into()))
}

#[utoipa::path(
    put,
    path = "/api/admin/email/templates/{key}",
    tag = "email",
    summary = "Create or replace an override",
    params(("key" = String, Path, description = "Template key")),
    request_body = TemplateUpsert,
    responses(
        (status = 200, description = "Stored override", body = TemplateResponse),
        (status = 400, description = "Invalid key, oversized source or parse failure"),
    )
)]
#[instrument(skip_all, fields(key = %key))]
pub async fn upsert_template(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(key): Path<String>,
    Json(request): Json<TemplateUpsert>,
) -> Result<Json<TemplateResponse>> {
    let template = state
        .email
        .templates()
        .upsert(&key, &request.subject_template, &request.html_template, request.enabled)
        .await?;
    Ok(Json(template.into()))
}

#[utoipa::path(
    delete,
    path = "/api/admin/email/templates/{key}",
    tag = "email",
    summary = "Delete an override",
    description = "Removes the stored override; the built-in, if any, takes over.",
    params(("key" = String, Path, description = "Template key")),
    responses(
        (status = 204, description = "Override removed"),
        (status = 404, description = "No override stored for the key"),
    )
)]
#[instrument(skip_all, fields(key = %key))]
pub async fn delete_template(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    state.email.templates().delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/admin/email/templates/{key}/preview",
    tag = "email",
    summary = "Preview a template",
    description = "Renders against arbitrary inputs without persisting. Omitted sources fall back to the stored override, then the built-in.",
    params(("key" = String, Path, description = "Template key")),
    request_body = TemplatePreview,
    responses(
        (status = 200, description = "Rendered subject, HTML and derived text", body = Rendered),
        (status = 400, description = "Template failed to render"),
        (status = 404, description = "No template for the key"),
    )
)]
#[instrument(skip_all, fields(key = %key))]
pub async fn preview_template(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Path(key): Path<String>,
    Json(request): Json<TemplatePreview>,
) -> Result<Json<Rendered>> {
    let rendered = match (request.subject_template, request.html_template) {
        (Some(subject), Some(html)) => state.email.templates().preview(&subject, &html, &request.vars)?,
        (subject, html) => {
            // Partial sources merge over the stored override when one exists.
            let stored = state.email.templates().get(&key).await?;
            match (subject.or_else(|| stored.as_ref().map(|t| t.subject_template.clone())), html.or_else(|| stored.map(|t| t.html_template))) {
                (Some(subject), Some(html)) => state.email.templates().preview(&subject, &html, &request.vars)?,
                _ => state.email.templates().render_with_fallback(&key, &request.vars).await?,
            }
        }
    };
    Ok(Json(rendered))
}

#[utoipa::path(
    post,
    path = "/api/admin/email/send",
    tag = "email",
    summary = "Send an email",
    description = "Sends either a rendered template (`template_key` + `vars`) or a raw `subject` + `html` pair.",
    request_body = SendEmailRequest,
    responses(
        (status = 200, description = "Sent"),
        (status = 400, description = "Neither template key nor raw content supplied"),
    )
)]
#[instrument(skip_all, fields(to = %request.to))]
pub async fn send_email(
    State(state): State<AppState>,
    RequireAdmin(_identity): RequireAdmin,
    Json(request): Json<SendEmailRequest>,
) -> Result<Json<serde_json::Value>> {
    match (&request.template_key, &request.subject, &request.html) {
        (Some(key), _, _) => {
            let rendered = state.email.send_templated(&request.to, key, &request.vars).await?;
            Ok(Json(serde_json::json!({ "sent": true, "subject": rendered.subject })))
        }
        (None, Some(subject), Some(html)) => {
            state.email.send_raw(&request.to, subject, html).await?;
            Ok(Json(serde_json::json!({ "sent": true, "subject": subject })))
        }
        _ => Err(Error::bad_request("provide template_key, or subject and html")),
    }
}
