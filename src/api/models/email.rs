//! API models for email template administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::email_templates::EmailTemplate;
use crate::types::TemplateId;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TemplateUpsert {
    pub subject_template: String,
    pub html_template: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TemplatePreview {
    /// Overrides to preview; omitted fields fall back to the stored override
    /// or built-in for the key
    #[serde(default)]
    pub subject_template: Option<String>,
    #[serde(default)]
    pub html_template: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub vars: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendEmailRequest {
    pub to: String,
    /// Template key to render; mutually exclusive with `subject`/`html`
    #[serde(default)]
    pub template_key: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub vars: serde_json::Value,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TemplateResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TemplateId,
    pub template_key: String,
    pub subject_template: String,
    pub html_template: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EmailTemplate> for TemplateResponse {
    fn from(template: EmailTemplate) -> Self {
        Self {
            id: template.id,
            template_key: template.template_key,
            subject_template: template.subject_template,
            html_template: template.html_template,
            enabled: template.enabled,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

/// Listing entry: stored overrides plus built-ins that have no override.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TemplateListEntry {
    pub template_key: String,
    /// Whether a stored override exists for the key
    pub overridden: bool,
    pub enabled: bool,
    /// Whether a built-in fallback exists for the key
    pub builtin: bool,
}
