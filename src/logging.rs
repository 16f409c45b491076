//! # Structured Logging
//!
//! Environment-aware `tracing` initialization for the reactor jobs. Safe to
//! call more than once; later calls are no-ops.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with an environment-derived filter.
///
/// `REACTOR_LOG` overrides the default level, which is `debug` outside of
/// production and `info` in production.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = std::env::var("REACTOR_LOG").unwrap_or_else(|_| default_log_level());

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(EnvFilter::new(filter)),
        );

        // A global subscriber may already be installed by the host process.
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}

fn default_log_level() -> String {
    match std::env::var("APP_ENV").as_deref() {
        Ok("production") => "info".to_string(),
        _ => "debug".to_string(),
    }
}
