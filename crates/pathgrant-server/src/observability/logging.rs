//! Structured logging setup.
//!
//! Every write path emits one event carrying the storage id and row count.
//! With `logging.json` enabled an insert looks like:
//!
//! ```json
//! {"timestamp":"2026-01-15T10:30:00.000Z","level":"INFO","fields":{"message":"inserted permissions","storage_id":42,"rows":3},"target":"pathgrant_domain::batch"}
//! ```
//!
//! `RUST_LOG` takes precedence over `logging.level`.

use tracing::Subscriber;
use tracing_subscriber::{fmt, prelude::*, registry::LookupSpan, EnvFilter, Layer};

use crate::config::LoggingSettings;

fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.to_lowercase()))
}

fn json_layer<S, W>(writer: W) -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_writer(writer)
        .with_current_span(true)
        .with_target(true)
}

/// Installs the global subscriber described by `settings`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter(settings));
    let installed = if settings.json {
        registry.with(json_layer(std::io::stdout)).try_init()
    } else {
        registry
            .with(fmt::layer().pretty().with_target(true))
            .try_init()
    };
    installed.is_ok()
}
