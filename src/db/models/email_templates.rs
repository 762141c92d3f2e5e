//! Database models for stored email template overrides.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::TemplateId;

/// Maximum subject template length.
pub const MAX_SUBJECT_LEN: usize = 1_000;
/// Maximum HTML body template length.
pub const MAX_HTML_LEN: usize = 256_000;

#[derive(Debug, Clone, FromRow)]
pub struct EmailTemplate {
    pub id: TemplateId,
    pub template_key: String,
    pub subject_template: String,
    pub html_template: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EmailTemplateUpsertDBRequest {
    pub template_key: String,
    pub subject_template: String,
    pub html_template: String,
    pub enabled: bool,
}
