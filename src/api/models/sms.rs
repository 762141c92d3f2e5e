//! API models for SMS administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::sms::SmsMessage;
use crate::types::{SmsMessageId, UserId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendSmsRequest {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SmsMessageResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: SmsMessageId,
    pub to: String,
    pub body: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl From<SmsMessage> for SmsMessageResponse {
    fn from(message: SmsMessage) -> Self {
        Self {
            id: message.id,
            to: message.to,
            body: message.body,
            provider: message.provider,
            message_id: message.message_id,
            status: message.status,
            error_message: message.error_message,
            user_id: message.user_id,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SmsHealthResponse {
    pub provider: String,
    pub allowed_countries: Vec<String>,
}
