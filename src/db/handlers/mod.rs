//! Repository implementations for the `_ayb_*` system tables.
//!
//! Each repository wraps a `&mut PgConnection`, so callers decide whether an
//! operation runs standalone or joins a surrounding transaction:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let mut repo = Jobs::new(&mut tx);
//! let outcome = repo.enqueue(&request).await?;
//! tx.commit().await?;
//! ```

pub mod api_keys;
pub mod apps;
pub mod changelog;
pub mod email_templates;
pub mod jobs;
pub mod matviews;
pub mod rls;
pub mod schedules;
pub mod sms;
pub mod storage;
pub mod users;
pub mod webhooks;

pub use api_keys::ApiKeys;
pub use apps::Apps;
pub use changelog::Changelog;
pub use email_templates::EmailTemplates;
pub use jobs::Jobs;
pub use matviews::Matviews;
pub use rls::Rls;
pub use schedules::Schedules;
pub use sms::SmsMessages;
pub use storage::StorageObjects;
pub use users::Users;
pub use webhooks::Webhooks;
