//! Repository for the SMS audit log.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::sms::{SmsMessage, SmsMessageCreateDBRequest};
use crate::types::SmsMessageId;

pub struct SmsMessages<'c> {
    db: &'c mut PgConnection,
}

impl<'c> SmsMessages<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(provider = %request.provider), err)]
    pub async fn create(&mut self, request: &SmsMessageCreateDBRequest) -> Result<SmsMessage> {
        let message = sqlx::query_as::<_, SmsMessage>(
            r#"
            INSERT INTO _ayb_sms_messages ("to", body, provider, message_id, status, error_message, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&request.to)
        .bind(&request.body)
        .bind(&request.provider)
        .bind(&request.message_id)
        .bind(&request.status)
        .bind(&request.error_message)
        .bind(request.user_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(message)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self, limit: i64, offset: i64) -> Result<Vec<SmsMessage>> {
        let messages = sqlx::query_as::<_, SmsMessage>(
            "SELECT * FROM _ayb_sms_messages ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(messages)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, id: SmsMessageId) -> Result<Option<SmsMessage>> {
        let message = sqlx::query_as::<_, SmsMessage>("SELECT * FROM _ayb_sms_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(message)
    }
}
