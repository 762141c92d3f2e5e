//! Tracing initialization.
//!
//! Log level is controlled by `RUST_LOG` (`EnvFilter` syntax); defaults to
//! `info` when unset. Safe to call more than once — later calls are no-ops,
//! which keeps tests that initialize logging independent of ordering.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init_telemetry() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
