//! Per-request database session context.
//!
//! Every authenticated request runs all of its statements on a single pooled
//! connection inside a transaction whose session-local variables carry the
//! request identity. Row-level security policies read `ayb.user_id`,
//! `ayb.role` and `ayb.app_id` via `current_setting(..., true)`.
//!
//! The variables are applied with `set_config(key, value, is_local => true)`,
//! which scopes them to the transaction: commit or rollback clears them, so
//! pool reuse can never leak one request's identity into the next checkout.

use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::db::errors::Result;
use crate::types::{AppId, Role, UserId};

/// Resolved identity of a request subject.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Option<UserId>,
    pub role: Role,
    pub app_id: Option<AppId>,
}

impl Identity {
    pub fn anon() -> Self {
        Self {
            user_id: None,
            role: Role::Anon,
            app_id: None,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            role: Role::User,
            app_id: None,
        }
    }

    pub fn admin(user_id: Option<UserId>) -> Self {
        Self {
            user_id,
            role: Role::Admin,
            app_id: None,
        }
    }

    pub fn service(app_id: Option<AppId>) -> Self {
        Self {
            user_id: None,
            role: Role::Service,
            app_id,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Service)
    }

    /// Value of `ayb.user_id`; empty string for unauthenticated traffic.
    pub fn user_id_setting(&self) -> String {
        self.user_id.map(|u| u.to_string()).unwrap_or_default()
    }

    pub fn app_id_setting(&self) -> String {
        self.app_id.map(|a| a.to_string()).unwrap_or_default()
    }
}

/// A transaction configured with the request identity.
///
/// Dropping the session without [`commit`](RequestSession::commit) rolls the
/// transaction back, which also discards the session variables.
pub struct RequestSession {
    tx: Transaction<'static, Postgres>,
}

impl RequestSession {
    /// Acquire a connection, begin a transaction and stamp the identity onto
    /// it for the lifetime of the transaction.
    pub async fn begin(pool: &PgPool, identity: &Identity) -> Result<Self> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            "SELECT set_config('ayb.user_id', $1, true),
                    set_config('ayb.role', $2, true),
                    set_config('ayb.app_id', $3, true)",
        )
        .bind(identity.user_id_setting())
        .bind(identity.role.as_str())
        .bind(identity.app_id_setting())
        .execute(&mut *tx)
        .await?;
        Ok(Self { tx })
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_identity_maps_to_empty_settings() {
        let identity = Identity::anon();
        assert_eq!(identity.user_id_setting(), "");
        assert_eq!(identity.app_id_setting(), "");
        assert_eq!(identity.role, Role::Anon);
        assert!(!identity.is_privileged());
    }

    #[test]
    fn user_identity_carries_the_uuid() {
        let id = uuid::Uuid::new_v4();
        let identity = Identity::user(id);
        assert_eq!(identity.user_id_setting(), id.to_string());
        assert_eq!(identity.role, Role::User);
    }

    #[test]
    fn service_identity_is_privileged_but_not_admin() {
        let identity = Identity::service(Some(uuid::Uuid::new_v4()));
        assert!(identity.is_privileged());
        assert!(!identity.is_admin());
    }
}
