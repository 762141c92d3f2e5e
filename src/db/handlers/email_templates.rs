//! Repository for stored email template overrides.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::email_templates::{EmailTemplate, EmailTemplateUpsertDBRequest};

pub struct EmailTemplates<'c> {
    db: &'c mut PgConnection,
}

impl<'c> EmailTemplates<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(key = %request.template_key), err)]
    pub async fn upsert(&mut self, request: &EmailTemplateUpsertDBRequest) -> Result<EmailTemplate> {
        let template = sqlx::query_as::<_, EmailTemplate>(
            r#"
            INSERT INTO _ayb_email_templates (template_key, subject_template, html_template, enabled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (template_key) DO UPDATE
                SET subject_template = EXCLUDED.subject_template,
                    html_template = EXCLUDED.html_template,
                    enabled = EXCLUDED.enabled,
                    updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&request.template_key)
        .bind(&request.subject_template)
        .bind(&request.html_template)
        .bind(request.enabled)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(template)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, template_key: &str) -> Result<Option<EmailTemplate>> {
        let template = sqlx::query_as::<_, EmailTemplate>("SELECT * FROM _ayb_email_templates WHERE template_key = $1")
            .bind(template_key)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(template)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<EmailTemplate>> {
        let templates = sqlx::query_as::<_, EmailTemplate>("SELECT * FROM _ayb_email_templates ORDER BY template_key")
            .fetch_all(&mut *self.db)
            .await?;
        Ok(templates)
    }

    #[instrument(skip(self), err)]
    pub async fn set_enabled(&mut self, template_key: &str, enabled: bool) -> Result<Option<EmailTemplate>> {
        let template = sqlx::query_as::<_, EmailTemplate>(
            "UPDATE _ayb_email_templates SET enabled = $2, updated_at = now() WHERE template_key = $1 RETURNING *",
        )
        .bind(template_key)
        .bind(enabled)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(template)
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&mut self, template_key: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM _ayb_email_templates WHERE template_key = $1")
            .bind(template_key)
            .execute(&mut *self.db)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
