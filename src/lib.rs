//! # Allyourbase: a Backend-as-a-Service in front of PostgreSQL
//!
//! A single binary that introspects a PostgreSQL database and exposes its
//! tables and functions as a REST/JSON API with row-level authorization,
//! streams row changes to subscribers, dispatches signed webhooks, runs a
//! durable job queue with a cron scheduler, refreshes materialized views,
//! stores binary objects, and sends transactional email and SMS.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); all persistence
//! is PostgreSQL through SQLx. The data plane ([`collections`], [`rpc`])
//! builds parameterized SQL against a cached, introspected schema
//! ([`schema`]) and runs every request inside a transaction whose
//! session-local variables carry the request identity ([`session`]), so the
//! database's row-level security policies see the right subject.
//!
//! Writes on replicated tables fire a trigger that records a change row and
//! NOTIFYs the realtime bus ([`realtime`]), which fans events out to SSE
//! subscribers and the webhook dispatcher ([`webhooks`]). Webhook deliveries
//! go through the durable job queue ([`jobs`]) so slow targets never stall
//! event fan-out. The cron scheduler ([`scheduler`]) enqueues jobs from
//! stored schedules; one handler refreshes materialized views ([`matviews`])
//! serialized by PostgreSQL advisory locks.
//!
//! ## Request flow for a typical write
//!
//! 1. The request resolves an identity (API key, admin session or user JWT)
//! 2. Collections executes a parameterized INSERT inside an identity-stamped
//!    transaction; RLS policies apply
//! 3. The change-log trigger records the row and NOTIFYs
//! 4. The realtime listener publishes the event to the bus
//! 5. SSE subscribers receive it (after a per-event RLS re-check) and the
//!    webhook dispatcher enqueues a signed delivery per matching webhook

pub mod api;
pub mod auth;
pub mod collections;
pub mod config;
mod crypto;
pub mod db;
pub mod email;
pub mod errors;
pub mod jobs;
pub mod matviews;
mod openapi;
pub mod realtime;
pub mod rpc;
pub mod scheduler;
pub mod schema;
pub mod session;
pub mod sms;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod webhooks;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use axum_prometheus::PrometheusMetricLayer;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{info, instrument, Level};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::auth::AuthState;
use crate::collections::CollectionService;
pub use crate::config::Config;
use crate::email::{EmailService, Mailer};
use crate::jobs::{HandlerRegistry, JobQueue};
use crate::matviews::{MatviewRefreshHandler, MatviewService};
use crate::realtime::{ChangelogPruneHandler, RealtimeBus};
use crate::rpc::RpcService;
use crate::scheduler::Scheduler;
use crate::schema::SchemaCache;
use crate::sms::SmsService;
use crate::storage::StorageService;
use crate::webhooks::{WebhookDeliverHandler, WebhookService};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub schema: Arc<SchemaCache>,
    pub auth: Arc<AuthState>,
    pub collections: Arc<CollectionService>,
    pub rpc: Arc<RpcService>,
    pub bus: RealtimeBus,
    pub queue: JobQueue,
    pub webhooks: Arc<WebhookService>,
    pub matviews: Arc<MatviewService>,
    pub storage: Arc<StorageService>,
    pub email: Arc<EmailService>,
    pub sms: Arc<SmsService>,
    pub scheduler: Scheduler,
    pub shutdown: tokio_util::sync::CancellationToken,
}

/// Get the database migrator.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect the pool and run migrations. Failure here is fatal by design: a
/// server with an unreachable or inconsistent database serves nothing useful.
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect(&config.database.url)
        .await
        .context("connect to PostgreSQL")?;

    migrator().run(&pool).await.context("run migrations")?;
    Ok(pool)
}

/// System schedules present in every installation.
async fn seed_system_schedules(pool: &PgPool, config: &Config) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;
    let mut repo = db::handlers::Schedules::new(&mut conn);
    if repo.get_by_name("changelog-prune").await?.is_some() {
        return Ok(());
    }

    let cron_expr = "0 * * * *";
    let next_run_at = scheduler::next_fire(cron_expr, "UTC", chrono::Utc::now()).ok().flatten();
    repo.create(&db::models::schedules::ScheduleCreateDBRequest {
        name: "changelog-prune".to_string(),
        job_type: realtime::CHANGELOG_PRUNE_JOB.to_string(),
        payload: serde_json::json!({}),
        cron_expr: cron_expr.to_string(),
        timezone: "UTC".to_string(),
        enabled: true,
        max_attempts: config.queue.max_attempts,
        next_run_at,
    })
    .await?;
    info!("Seeded changelog-prune schedule");
    Ok(())
}

/// Wire up the job handler registry.
fn build_registry(state: &AppState) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(WebhookDeliverHandler::new(state.webhooks.clone())));
    registry.register(Arc::new(MatviewRefreshHandler::new(state.matviews.clone())));
    registry.register(Arc::new(ChangelogPruneHandler::new(state.config.realtime.changelog_retention)));
    info!(types = ?registry.types(), "Job handlers registered");
    registry
}

fn build_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    use axum::http::Method;
    use tower_http::cors::{AllowHeaders, Any};

    let wildcard = config.cors.allowed_origins.iter().any(|o| o == "*");
    let credentials = config.cors.allow_credentials && !wildcard;

    let mut cors = if wildcard {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        let origins: Result<Vec<_>, _> = config
            .cors
            .allowed_origins
            .iter()
            .map(|o| o.parse::<axum::http::HeaderValue>())
            .collect();
        CorsLayer::new().allow_origin(origins.context("parse CORS origins")?)
    };

    // Wildcards are rejected by the browser (and tower-http) alongside
    // credentials, so the credentialed variant enumerates methods and mirrors
    // request headers instead.
    cors = if credentials {
        cors.allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers(AllowHeaders::mirror_request())
    } else {
        cors.allow_methods(Any).allow_headers(Any)
    };

    if let Some(max_age) = config.cors.max_age_secs {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }
    Ok(cors)
}

/// Build the full router with documentation, metrics and tracing layers.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let mut router = api::router(state.clone())
        .merge(Scalar::with_url("/api/docs", openapi::ApiDoc::openapi()))
        .route(
            "/api-docs/openapi.json",
            get(|| async { axum::Json(openapi::ApiDoc::openapi()) }),
        );

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(build_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background services and their lifecycle.
pub struct BackgroundServices {
    tasks: tokio::task::JoinSet<anyhow::Result<()>>,
    task_names: std::collections::HashMap<tokio::task::Id, &'static str>,
    shutdown: tokio_util::sync::CancellationToken,
}

impl BackgroundServices {
    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = self.tasks.spawn(future);
        self.task_names.insert(handle.id(), name);
    }

    /// Wait for any background task to exit; an exit before shutdown is a
    /// failure the caller should treat as fatal.
    pub async fn wait_for_failure(&mut self) -> anyhow::Result<std::convert::Infallible> {
        match self.tasks.join_next_with_id().await {
            None => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            Some(Ok((id, Ok(())))) => {
                let name = self.task_names.get(&id).copied().unwrap_or("unknown");
                anyhow::bail!("background task '{name}' exited early")
            }
            Some(Ok((id, Err(e)))) => {
                let name = self.task_names.get(&id).copied().unwrap_or("unknown");
                anyhow::bail!("background task '{name}' failed: {e}")
            }
            Some(Err(e)) => {
                let name = self.task_names.get(&e.id()).copied().unwrap_or("unknown");
                anyhow::bail!("background task '{name}' panicked: {e}")
            }
        }
    }

    /// Signal everything to stop and wait for the tasks to drain.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        while let Some(result) = self.tasks.join_next_with_id().await {
            match result {
                Ok((id, Ok(()))) => {
                    let name = self.task_names.get(&id).copied().unwrap_or("unknown");
                    tracing::debug!(task = name, "Background task stopped");
                }
                Ok((id, Err(e))) => {
                    let name = self.task_names.get(&id).copied().unwrap_or("unknown");
                    tracing::error!(task = name, error = %e, "Background task failed during shutdown");
                }
                Err(e) => {
                    let name = self.task_names.get(&e.id()).copied().unwrap_or("unknown");
                    tracing::error!(task = name, error = %e, "Background task panicked");
                }
            }
        }
    }
}

/// Main application: owns the router, state and background services.
pub struct Application {
    router: Router,
    state: AppState,
    background: BackgroundServices,
}

impl Application {
    /// Connect, migrate, introspect, wire services and start background work.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = setup_database(&config).await?;
        seed_system_schedules(&pool, &config).await?;

        let schema = Arc::new(
            SchemaCache::build(pool.clone(), config.schemas.clone())
                .await
                .context("introspect database schema")?,
        );
        let auth = Arc::new(AuthState::bootstrap_async(config.auth.clone()).await?);

        let shutdown = tokio_util::sync::CancellationToken::new();
        let bus = RealtimeBus::new(config.realtime.buffer);
        let queue = JobQueue::new(pool.clone(), config.queue.clone());
        let webhook_service = Arc::new(WebhookService::new(pool.clone(), config.webhooks.clone()));
        let matview_service = Arc::new(MatviewService::new(pool.clone()));
        let mailer = Mailer::new(&config.email).map_err(|e| anyhow::anyhow!("build mailer: {e}"))?;
        let email_service = Arc::new(EmailService::new(pool.clone(), mailer));
        let sms_sender = SmsService::sender_from_config(&config.sms);
        let sms_service = Arc::new(SmsService::new(pool.clone(), sms_sender, config.sms.allowed_countries.clone()));
        let storage_service = Arc::new(StorageService::new(pool.clone(), &config));
        let scheduler = Scheduler::new(pool.clone(), queue.clone());

        let state = AppState {
            collections: Arc::new(CollectionService::new(schema.clone())),
            rpc: Arc::new(RpcService::new(schema.clone())),
            db: pool.clone(),
            config: config.clone(),
            schema,
            auth,
            bus: bus.clone(),
            queue: queue.clone(),
            webhooks: webhook_service.clone(),
            matviews: matview_service,
            storage: storage_service,
            email: email_service,
            sms: sms_service,
            scheduler: scheduler.clone(),
            shutdown: shutdown.clone(),
        };

        let mut background = BackgroundServices {
            tasks: tokio::task::JoinSet::new(),
            task_names: std::collections::HashMap::new(),
            shutdown: shutdown.clone(),
        };

        // Realtime listener: change-log NOTIFY plus catch-up polling.
        {
            let pool = pool.clone();
            let bus = bus.clone();
            let realtime_config = config.realtime.clone();
            let token = shutdown.clone();
            background.spawn("realtime-listener", async move {
                realtime::run_listener(pool, bus, realtime_config, token).await;
                Ok(())
            });
        }

        // Webhook dispatcher: bus consumer enqueueing delivery jobs.
        {
            let service = (*webhook_service).clone();
            let bus = bus.clone();
            let queue = queue.clone();
            let token = shutdown.clone();
            background.spawn("webhook-dispatcher", async move {
                service.run_dispatcher(bus, queue, token).await;
                Ok(())
            });
        }

        // Queue workers and the lease sweeper.
        let registry = Arc::new(build_registry(&state));
        jobs::worker::WorkerPool::new(pool.clone(), config.queue.clone(), registry).spawn(&mut background.tasks, shutdown.clone());

        // One task per enabled schedule.
        scheduler.initialize(shutdown.clone()).await?;

        // SIGUSR1 regenerates the admin password.
        #[cfg(unix)]
        {
            let auth = state.auth.clone();
            let token = shutdown.clone();
            background.spawn("admin-password-reset", async move {
                let mut stream =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()).context("install SIGUSR1 handler")?;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        received = stream.recv() => {
                            if received.is_none() {
                                return Ok(());
                            }
                            if let Err(e) = auth.regenerate_admin_password().await {
                                tracing::error!(error = %e, "Admin password regeneration failed");
                            }
                        }
                    }
                }
            });
        }

        let router = build_router(state.clone())?;

        Ok(Self {
            router,
            state,
            background,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Bind and serve until the shutdown future resolves or a background task
    /// dies. On shutdown: stop accepting requests, cancel the listener and
    /// scheduler, let workers finish the job in hand, close the pool.
    pub async fn serve<F>(mut self, shutdown_signal: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await.with_context(|| format!("bind {addr}"))?;
        info!(addr = %addr, "Allyourbase listening");

        let token = self.state.shutdown.clone();
        let server = axum::serve(listener, self.router).with_graceful_shutdown({
            let token = token.clone();
            async move {
                token.cancelled().await;
            }
        });

        let outcome = tokio::select! {
            result = server => result.map_err(anyhow::Error::from),
            _ = shutdown_signal => {
                info!("Shutdown signal received");
                Ok(())
            }
            failure = self.background.wait_for_failure() => {
                failure.map(|_| ())
            }
        };

        token.cancel();
        self.state.scheduler.stop_all().await;
        self.background.shutdown().await;
        self.state.db.close().await;
        info!("Shutdown complete");
        outcome
    }
}
