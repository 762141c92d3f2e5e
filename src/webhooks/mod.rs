//! Outbound webhooks.
//!
//! - [`signing`]: HMAC-SHA256 signature over the exact request body
//! - [`service`]: event matching, delivery, and the `webhook.deliver` job
//!   handler the queue runs

pub mod service;
pub mod signing;

pub use service::{DeliverPayload, WebhookDeliverHandler, WebhookService, WEBHOOK_DELIVER_JOB};
