//! Database models for the SMS send audit log.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{SmsMessageId, UserId};

#[derive(Debug, Clone, FromRow)]
pub struct SmsMessage {
    pub id: SmsMessageId,
    pub to: String,
    pub body: String,
    pub provider: String,
    pub message_id: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SmsMessageCreateDBRequest {
    pub to: String,
    pub body: String,
    pub provider: String,
    pub message_id: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub user_id: Option<UserId>,
}
