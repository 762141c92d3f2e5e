//! Database layer: repositories over the `_ayb_*` system tables.
//!
//! Follows the repository pattern: each entity has a model struct matching its
//! table ([`models`]) and a repository wrapping a `&mut PgConnection`
//! ([`handlers`]) so callers choose whether operations join a transaction.

pub mod errors;
pub mod handlers;
pub mod models;
