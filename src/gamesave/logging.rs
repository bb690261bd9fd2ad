//! Logging setup for binaries and tests.
//!
//! The library only emits `tracing` events; installing a subscriber is up to
//! the embedding application. [`init_logging`] is the one the CLI uses.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs.
    Json,
    /// Multi-line human-readable logs.
    Pretty,
    /// Single-line human-readable logs.
    #[default]
    Compact,
}

/// Default filter for a `-v` count: warnings only, then info, then debug.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// `RUST_LOG` overrides `verbosity` when set. Safe to call more than once;
/// later calls do nothing.
pub fn init_logging(format: LogFormat, verbosity: u8) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
        let registry = tracing_subscriber::registry().with(env_filter);

        match format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init(),
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init(),
        }
    });
}

/// Span wrapping everything done on behalf of one user's session.
#[must_use]
pub fn session_span(user: &str, command: &str) -> Span {
    tracing::info_span!("session", user = user, command = command)
}
