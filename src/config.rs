//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `ayb.yaml` but can be specified via
//! the `-f` flag or the `AYB_CONFIG` environment variable.
//!
//! ## Loading priority
//!
//! Sources are merged in order (later overrides earlier):
//!
//! 1. **YAML config file** — base configuration (default: `ayb.yaml`, missing
//!    file is fine, defaults apply)
//! 2. **Environment variables** — `AYB_`-prefixed variables, with double
//!    underscores for nesting (`AYB_DATABASE__MAX_CONNECTIONS=20`)
//! 3. **Well-known variables** — `AYB_DATABASE_URL`, `AYB_AUTH_ENABLED`,
//!    `AYB_AUTH_JWT_SECRET`, `AYB_ADMIN_TOKEN`, `AYB_ADMIN_PASSWORD`,
//!    `AYB_BASE_URL` map onto their nested fields directly

use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::Error;

/// Notification channel the change-log trigger fires on.
pub static CHANGELOG_CHANNEL: &str = "ayb_changes";

/// Simple CLI args - just for specifying the config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "AYB_CONFIG", default_value = "ayb.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Public base URL used in signed URLs and email links
    pub base_url: String,
    /// PostgreSQL connection settings
    pub database: DatabaseConfig,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Realtime bus settings
    pub realtime: RealtimeConfig,
    /// Job queue settings
    pub queue: QueueConfig,
    /// Webhook delivery settings
    pub webhooks: WebhookConfig,
    /// Blob storage settings
    pub storage: StorageConfig,
    /// Email transport settings
    pub email: EmailConfig,
    /// SMS dispatch settings
    pub sms: SmsConfig,
    /// CORS settings
    pub cors: CorsConfig,
    /// Enable the Prometheus endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Schemas the data plane exposes; introspection is restricted to these
    pub schemas: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            base_url: "http://localhost:8090".to_string(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            realtime: RealtimeConfig::default(),
            queue: QueueConfig::default(),
            webhooks: WebhookConfig::default(),
            storage: StorageConfig::default(),
            email: EmailConfig::default(),
            sms: SmsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: true,
            schemas: vec!["public".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/allyourbase".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Whether user authentication is enforced; when false every request runs
    /// as `anon`
    pub enabled: bool,
    /// Secret used to verify user-issued JWTs
    pub jwt_secret: Option<String>,
    /// Static admin bearer token (service automation); checked verbatim
    pub admin_token: Option<String>,
    /// Admin password; when unset a random one is generated at startup and
    /// written to the token file
    pub admin_password: Option<String>,
    /// Lifetime of admin session tokens issued by `POST /api/admin/auth`
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    /// File the auto-generated admin password is written to
    pub admin_token_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: None,
            admin_token: None,
            admin_password: None,
            session_ttl: Duration::from_secs(2 * 60 * 60),
            admin_token_file: None,
        }
    }
}

impl AuthConfig {
    /// Resolved path of the admin token file (`~/.ayb/admin-token` unless
    /// overridden).
    pub fn admin_token_path(&self) -> PathBuf {
        if let Some(path) = &self.admin_token_file {
            return path.clone();
        }
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        home.join(".ayb").join("admin-token")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RealtimeConfig {
    /// Per-subscriber buffer; oldest events are dropped past this point
    pub buffer: usize,
    /// Catch-up poll interval for changes missed by LISTEN/NOTIFY
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Change-log retention window for the prune job
    #[serde(with = "humantime_serde")]
    pub changelog_retention: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            buffer: 256,
            poll_interval: Duration::from_secs(5),
            changelog_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Jobs claimed per poll
    pub batch_size: i64,
    /// Poll interval when the queue is idle
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Lease duration for a claimed job
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
    /// Interval of the expired-lease sweeper
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Default max attempts for enqueued jobs
    pub max_attempts: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            lease_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(150),
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    /// Outbound HTTP timeout per delivery
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Max bytes of request/response body kept in the delivery audit row
    pub max_body_capture: usize,
    /// 4xx status codes that are retried instead of treated as terminal
    pub retry_on_4xx: Vec<u16>,
    /// Max delivery attempts per event
    pub max_attempts: i32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_body_capture: 4096,
            retry_on_4xx: vec![408, 429],
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Root directory for bucket data
    pub root: PathBuf,
    /// Lifetime of signed URLs
    #[serde(with = "humantime_serde")]
    pub signed_url_ttl: Duration,
    /// Secret for signed URL HMACs; falls back to the auth JWT secret
    pub signing_secret: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./ayb_storage"),
            signed_url_ttl: Duration::from_secs(15 * 60),
            signing_secret: None,
        }
    }
}

/// Email transport: real SMTP or file drops for development.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmailTransportConfig {
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
        use_tls: bool,
    },
    File {
        path: String,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailConfig {
    pub transport: EmailTransportConfig,
    pub from_email: String,
    pub from_name: String,
    pub reply_to: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::File {
                path: "./ayb_emails".to_string(),
            },
            from_email: "noreply@localhost".to_string(),
            from_name: "Allyourbase".to_string(),
            reply_to: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmsConfig {
    /// Adapter name: `log` or `capture` in-repo; provider adapters register
    /// under their own names
    pub provider: String,
    /// Sender number in E.164
    pub from_number: Option<String>,
    /// ISO 3166-1 alpha-2 codes allowed to receive SMS; empty allows all
    pub allowed_countries: Vec<String>,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            provider: "log".to_string(),
            from_number: None,
            allowed_countries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: false,
            max_age_secs: Some(3600),
        }
    }
}

impl Config {
    /// Load configuration from the YAML file and `AYB_` environment variables.
    pub fn load(args: &Args) -> Result<Self, Error> {
        let figment = Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("AYB_").ignore(&[
                "DATABASE_URL",
                "AUTH_ENABLED",
                "AUTH_JWT_SECRET",
                "ADMIN_TOKEN",
                "ADMIN_PASSWORD",
                "BASE_URL",
                "CONFIG",
            ]).split("__"));

        let mut config: Config = figment.extract().map_err(|e| Error::Internal {
            operation: format!("load configuration: {e}"),
        })?;

        // Well-known flat variables take precedence over everything.
        if let Ok(url) = std::env::var("AYB_DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(enabled) = std::env::var("AYB_AUTH_ENABLED") {
            config.auth.enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
        if let Ok(secret) = std::env::var("AYB_AUTH_JWT_SECRET") {
            config.auth.jwt_secret = Some(secret);
        }
        if let Ok(token) = std::env::var("AYB_ADMIN_TOKEN") {
            config.auth.admin_token = Some(token);
        }
        if let Ok(password) = std::env::var("AYB_ADMIN_PASSWORD") {
            config.auth.admin_password = Some(password);
        }
        if let Ok(base_url) = std::env::var("AYB_BASE_URL") {
            config.base_url = base_url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.queue.workers == 0 {
            return Err(Error::bad_request("queue.workers must be at least 1"));
        }
        if self.realtime.buffer == 0 {
            return Err(Error::bad_request("realtime.buffer must be at least 1"));
        }
        if self.schemas.is_empty() {
            return Err(Error::bad_request("at least one schema must be exposed"));
        }
        Ok(())
    }

    /// Secret for storage signed URLs, falling back through the auth secrets.
    pub fn signing_secret(&self) -> Option<String> {
        self.storage
            .signing_secret
            .clone()
            .or_else(|| self.auth.jwt_secret.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 8090);
        assert_eq!(config.queue.lease_ttl, Duration::from_secs(300));
        assert_eq!(config.webhooks.max_attempts, 8);
        assert_eq!(config.realtime.buffer, 256);
    }

    #[test]
    #[serial_test::serial]
    fn well_known_env_vars_override_figment() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("AYB_DATABASE_URL", "postgres://db.internal/ayb");
            jail.set_env("AYB_AUTH_ENABLED", "false");
            jail.set_env("AYB_BASE_URL", "https://ayb.example.com");
            let args = Args {
                config: "missing.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).expect("config should load");
            assert_eq!(config.database.url, "postgres://db.internal/ayb");
            assert!(!config.auth.enabled);
            assert_eq!(config.base_url, "https://ayb.example.com");
            Ok(())
        });
    }

    #[test]
    #[serial_test::serial]
    fn nested_env_vars_use_double_underscores() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("AYB_DATABASE__MAX_CONNECTIONS", "25");
            jail.set_env("AYB_QUEUE__WORKERS", "8");
            let args = Args {
                config: "missing.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).expect("config should load");
            assert_eq!(config.database.max_connections, 25);
            assert_eq!(config.queue.workers, 8);
            Ok(())
        });
    }

    #[test]
    fn admin_token_path_prefers_override() {
        let auth = AuthConfig {
            admin_token_file: Some(PathBuf::from("/tmp/ayb-token")),
            ..AuthConfig::default()
        };
        assert_eq!(auth.admin_token_path(), PathBuf::from("/tmp/ayb-token"));
    }
}
