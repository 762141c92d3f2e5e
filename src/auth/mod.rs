//! Authentication: admin password lifecycle, session tokens, API keys and
//! the request identity extractors.

pub mod middleware;
pub mod password;
pub mod token;

use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::config::AuthConfig;
use crate::errors::{Error, Result};

pub use middleware::{CurrentIdentity, RequireAdmin};

/// Mutable authentication state: the admin password hash can be regenerated
/// at runtime (SIGUSR1), everything else is fixed at startup.
pub struct AuthState {
    config: AuthConfig,
    admin_password_hash: RwLock<Option<String>>,
    /// Secret for admin session tokens; the configured JWT secret, or a
    /// process-local random one when none is configured.
    session_secret: Vec<u8>,
}

impl AuthState {
    /// Build from config. When no admin password is configured, an
    /// auto-generated one is hashed and written to the token file for the
    /// CLI to pick up.
    pub fn bootstrap(config: AuthConfig) -> Result<Self> {
        let session_secret = match &config.jwt_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => crate::crypto::generate_secret().into_bytes(),
        };

        let mut state = Self {
            config,
            admin_password_hash: RwLock::new(None),
            session_secret,
        };

        let initial = match &state.config.admin_password {
            Some(password) => password.clone(),
            None => {
                let generated = password::generate_password();
                state.write_token_file(&generated)?;
                tracing::info!(path = %state.token_file_path().display(), "Generated admin password written to token file");
                generated
            }
        };
        let hash = password::hash_password(&initial)?;
        state.admin_password_hash = RwLock::new(Some(hash));
        Ok(state)
    }

    /// Async-context variant of [`bootstrap`](Self::bootstrap).
    pub async fn bootstrap_async(config: AuthConfig) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::bootstrap(config))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("bootstrap auth state: {e}"),
            })?
    }

    pub fn auth_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.config.jwt_secret.as_deref()
    }

    pub fn static_admin_token(&self) -> Option<&str> {
        self.config.admin_token.as_deref()
    }

    pub fn session_ttl(&self) -> std::time::Duration {
        self.config.session_ttl
    }

    fn token_file_path(&self) -> PathBuf {
        self.config.admin_token_path()
    }

    fn write_token_file(&self, value: &str) -> Result<()> {
        let path = self.token_file_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Internal {
                operation: format!("create token directory: {e}"),
            })?;
        }
        std::fs::write(&path, format!("{value}\n")).map_err(|e| Error::Internal {
            operation: format!("write admin token file: {e}"),
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }

    pub async fn verify_admin_password(&self, candidate: &str) -> bool {
        let guard = self.admin_password_hash.read().await;
        match guard.as_deref() {
            Some(hash) => password::verify_password(candidate, hash),
            None => false,
        }
    }

    /// Replace the admin password with a fresh random one and write it to the
    /// token file. Driven by SIGUSR1.
    pub async fn regenerate_admin_password(&self) -> Result<()> {
        let generated = password::generate_password();
        let hash = password::hash_password(&generated)?;
        *self.admin_password_hash.write().await = Some(hash);
        self.write_token_file(&generated)?;
        tracing::info!(path = %self.token_file_path().display(), "Admin password regenerated");
        Ok(())
    }

    /// Exchange a correct password for a session token.
    pub async fn issue_session(&self, presented_password: &str) -> Result<String> {
        if !self.verify_admin_password(presented_password).await {
            return Err(Error::Unauthenticated {
                message: Some("invalid admin password".to_string()),
            });
        }
        token::issue_admin_token(&self.session_secret, self.config.session_ttl)
    }

    /// Whether a bearer token grants admin: the static configured token, or
    /// a valid session token.
    pub fn verify_admin_bearer(&self, bearer: &str) -> bool {
        if let Some(static_token) = self.static_admin_token() {
            if !static_token.is_empty() && constant_time_eq(static_token.as_bytes(), bearer.as_bytes()) {
                return true;
            }
        }
        token::verify_admin_token(&self.session_secret, bearer)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(password: Option<&str>, dir: &std::path::Path) -> AuthConfig {
        AuthConfig {
            admin_password: password.map(str::to_string),
            admin_token_file: Some(dir.join("admin-token")),
            ..AuthConfig::default()
        }
    }

    #[tokio::test]
    async fn configured_password_authenticates() {
        let dir = tempfile::tempdir().unwrap();
        let state = AuthState::bootstrap_async(config_with(Some("swordfish"), dir.path())).await.unwrap();
        assert!(state.verify_admin_password("swordfish").await);
        assert!(!state.verify_admin_password("marlin").await);
    }

    #[tokio::test]
    async fn missing_password_is_generated_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let state = AuthState::bootstrap_async(config_with(None, dir.path())).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("admin-token")).unwrap();
        assert!(state.verify_admin_password(written.trim()).await);
    }

    #[tokio::test]
    async fn regeneration_invalidates_the_old_password() {
        let dir = tempfile::tempdir().unwrap();
        let state = AuthState::bootstrap_async(config_with(None, dir.path())).await.unwrap();
        let old = std::fs::read_to_string(dir.path().join("admin-token")).unwrap();
        state.regenerate_admin_password().await.unwrap();
        let new = std::fs::read_to_string(dir.path().join("admin-token")).unwrap();
        assert_ne!(old, new);
        assert!(!state.verify_admin_password(old.trim()).await);
        assert!(state.verify_admin_password(new.trim()).await);
    }

    #[tokio::test]
    async fn sessions_round_trip_and_bad_passwords_do_not() {
        let dir = tempfile::tempdir().unwrap();
        let state = AuthState::bootstrap_async(config_with(Some("pw"), dir.path())).await.unwrap();
        let session = state.issue_session("pw").await.unwrap();
        assert!(state.verify_admin_bearer(&session));
        assert!(state.issue_session("wrong").await.is_err());
        assert!(!state.verify_admin_bearer("bogus"));
    }

    #[tokio::test]
    async fn static_admin_token_grants_admin() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(Some("pw"), dir.path());
        config.admin_token = Some("static-token".to_string());
        let state = AuthState::bootstrap_async(config).await.unwrap();
        assert!(state.verify_admin_bearer("static-token"));
        assert!(!state.verify_admin_bearer("static-tokeX"));
    }
}
