//! SMS dispatch through a pluggable provider adapter.
//!
//! The service normalizes recipients to E.164, consults the country
//! allow-list, delegates to the configured [`SmsSender`], and writes an audit
//! row per send. Two adapters ship in-repo: `log` writes to the log instead
//! of sending, and `capture` retains the last body so tests can pull the OTP
//! back out. Provider adapters implement the same one-method trait.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::db::errors::DbError;
use crate::db::handlers::SmsMessages;
use crate::db::models::sms::{SmsMessage, SmsMessageCreateDBRequest};
use crate::errors::{Error, Result};
use crate::types::UserId;

/// Outcome of a provider send.
#[derive(Debug, Clone)]
pub struct SmsSendResult {
    pub message_id: Option<String>,
    pub status: String,
}

/// Provider adapter surface: one method, no provider detail leaks out.
#[async_trait]
pub trait SmsSender: Send + Sync {
    fn provider(&self) -> &str;

    async fn send(&self, to: &str, body: &str) -> anyhow::Result<SmsSendResult>;
}

/// Writes messages to the log instead of sending them.
pub struct LogSender;

#[async_trait]
impl SmsSender for LogSender {
    fn provider(&self) -> &str {
        "log"
    }

    async fn send(&self, to: &str, body: &str) -> anyhow::Result<SmsSendResult> {
        tracing::info!(to, body, "SMS (log adapter)");
        Ok(SmsSendResult {
            message_id: Some(Uuid::new_v4().to_string()),
            status: "logged".to_string(),
        })
    }
}

/// Retains the last message for tests.
#[derive(Default)]
pub struct CaptureSender {
    last: Mutex<Option<(String, String)>>,
}

impl CaptureSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_message(&self) -> Option<(String, String)> {
        self.last.lock().expect("capture lock").clone()
    }

    /// Extract the one-time code from the last captured body: the first run
    /// of 4-8 consecutive digits.
    pub fn last_otp(&self) -> Option<String> {
        let (_, body) = self.last_message()?;
        extract_otp(&body)
    }
}

#[async_trait]
impl SmsSender for CaptureSender {
    fn provider(&self) -> &str {
        "capture"
    }

    async fn send(&self, to: &str, body: &str) -> anyhow::Result<SmsSendResult> {
        *self.last.lock().expect("capture lock") = Some((to.to_string(), body.to_string()));
        Ok(SmsSendResult {
            message_id: Some(Uuid::new_v4().to_string()),
            status: "captured".to_string(),
        })
    }
}

/// First run of 4-8 consecutive digits in `body`.
pub fn extract_otp(body: &str) -> Option<String> {
    let bytes = body.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let run = i - start;
            if (4..=8).contains(&run) {
                return Some(body[start..i].to_string());
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Normalize a phone number to E.164. Returns the normalized number and the
/// ISO 3166-1 alpha-2 region when one can be derived.
pub fn normalize_e164(input: &str) -> Result<(String, Option<String>)> {
    let number = phonenumber::parse(None, input)
        .map_err(|e| Error::bad_field(format!("invalid phone number: {e}"), "to"))?;
    if !phonenumber::is_valid(&number) {
        return Err(Error::bad_field("phone number is not valid", "to"));
    }
    let normalized = phonenumber::format(&number).mode(phonenumber::Mode::E164).to_string();
    let region = number.country().id().map(|id| format!("{id:?}").to_ascii_uppercase());
    Ok((normalized, region))
}

pub struct SmsService {
    pool: PgPool,
    sender: Arc<dyn SmsSender>,
    allowed_countries: Vec<String>,
}

impl SmsService {
    pub fn new(pool: PgPool, sender: Arc<dyn SmsSender>, allowed_countries: Vec<String>) -> Self {
        let allowed_countries = allowed_countries.into_iter().map(|c| c.to_ascii_uppercase()).collect();
        Self {
            pool,
            sender,
            allowed_countries,
        }
    }

    /// Pick the adapter named in config. Unknown names fall back to `log`
    /// so a typo degrades to no-op delivery instead of a crash loop.
    pub fn sender_from_config(config: &crate::config::SmsConfig) -> Arc<dyn SmsSender> {
        match config.provider.as_str() {
            "capture" => Arc::new(CaptureSender::new()),
            "log" => Arc::new(LogSender),
            other => {
                tracing::warn!(provider = other, "Unknown SMS provider, using the log adapter");
                Arc::new(LogSender)
            }
        }
    }

    pub fn provider(&self) -> &str {
        self.sender.provider()
    }

    pub fn allowed_countries(&self) -> &[String] {
        &self.allowed_countries
    }

    fn region_allowed(&self, region: Option<&str>) -> bool {
        if self.allowed_countries.is_empty() {
            return true;
        }
        match region {
            Some(region) => self.allowed_countries.iter().any(|c| c == region),
            None => false,
        }
    }

    /// Normalize, authorize, dispatch and audit one message.
    #[instrument(skip(self, body), err)]
    pub async fn send(&self, to: &str, body: &str, user_id: Option<UserId>) -> Result<SmsMessage> {
        let (normalized, region) = normalize_e164(to)?;
        if !self.region_allowed(region.as_deref()) {
            return Err(Error::forbidden(format!(
                "destination region {} is not allowed",
                region.as_deref().unwrap_or("unknown")
            )));
        }

        let outcome = self.sender.send(&normalized, body).await;
        let (message_id, status, error_message) = match &outcome {
            Ok(result) => (result.message_id.clone(), result.status.clone(), None),
            Err(e) => (None, "failed".to_string(), Some(format!("{e:#}"))),
        };

        match &outcome {
            Ok(_) => metrics::counter!("ayb_sms_sent_total", "provider" => self.provider().to_string()).increment(1),
            Err(_) => metrics::counter!("ayb_sms_failed_total", "provider" => self.provider().to_string()).increment(1),
        }

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let audit = SmsMessages::new(&mut conn)
            .create(&SmsMessageCreateDBRequest {
                to: normalized,
                body: body.to_string(),
                provider: self.provider().to_string(),
                message_id,
                status,
                error_message,
                user_id,
            })
            .await?;

        match outcome {
            Ok(_) => Ok(audit),
            Err(e) => Err(Error::Internal {
                operation: format!("send SMS: {e:#}"),
            }),
        }
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<SmsMessage>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let messages = SmsMessages::new(&mut conn).list(limit, offset).await?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_idempotent() {
        let inputs = ["+1 415 555 2671", "+44 20 7946 0958", "+4915112345678"];
        for input in inputs {
            let (first, _) = normalize_e164(input).unwrap();
            let (second, _) = normalize_e164(&first).unwrap();
            assert_eq!(first, second, "normalize(normalize({input}))");
            assert!(first.starts_with('+'));
            assert!(first[1..].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        assert!(normalize_e164("not a number").is_err());
        assert!(normalize_e164("").is_err());
        assert!(normalize_e164("+1").is_err());
    }

    #[test]
    fn regions_are_derived_for_allow_listing() {
        let (_, region) = normalize_e164("+14155552671").unwrap();
        assert_eq!(region.as_deref(), Some("US"));
        let (_, region) = normalize_e164("+442079460958").unwrap();
        assert_eq!(region.as_deref(), Some("GB"));
    }

    #[test]
    fn otp_extraction_finds_the_first_plausible_run() {
        assert_eq!(extract_otp("Your code is 123456."), Some("123456".to_string()));
        assert_eq!(extract_otp("Code: 1234"), Some("1234".to_string()));
        assert_eq!(extract_otp("12345678 is your code"), Some("12345678".to_string()));
        // Runs outside 4-8 digits are not codes.
        assert_eq!(extract_otp("call 123"), None);
        assert_eq!(extract_otp("ref 123456789012, code 9876"), Some("9876".to_string()));
        assert_eq!(extract_otp("no digits here"), None);
    }

    #[tokio::test]
    async fn capture_adapter_retains_the_last_body() {
        let capture = CaptureSender::new();
        capture.send("+14155552671", "Your code is 4242").await.unwrap();
        assert_eq!(capture.last_otp(), Some("4242".to_string()));
        capture.send("+14155552671", "Your code is 777888").await.unwrap();
        assert_eq!(capture.last_otp(), Some("777888".to_string()));
        let (to, _) = capture.last_message().unwrap();
        assert_eq!(to, "+14155552671");
    }

    #[tokio::test]
    async fn log_adapter_reports_success_without_sending() {
        let result = LogSender.send("+14155552671", "hello").await.unwrap();
        assert_eq!(result.status, "logged");
        assert!(result.message_id.is_some());
    }
}
