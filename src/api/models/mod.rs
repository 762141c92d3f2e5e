//! API request and response models, with conversions from the database
//! models. Secrets only appear in create responses.

pub mod admin;
pub mod api_keys;
pub mod apps;
pub mod collections;
pub mod email;
pub mod jobs;
pub mod matviews;
pub mod pagination;
pub mod rls;
pub mod schedules;
pub mod sms;
pub mod users;
pub mod webhooks;
