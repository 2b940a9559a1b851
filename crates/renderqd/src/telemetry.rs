//! Structured telemetry initialisation for the daemon.
//!
//! Every module logs under its own target (`renderqd::transport`,
//! `renderqd::worker`, `renderqd::engine` and so on), so `--log-filter` can
//! raise engine chatter to `debug` without flooding the rest.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use renderq_config::{LogFormat, ServerConfig};

static TELEMETRY_GUARD: OnceCell<LogFormat> = OnceCell::new();

/// Handle describing the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Format chosen by the call that installed the subscriber.
    #[must_use]
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter '{expression}': {message}")]
    Filter {
        /// Expression as configured.
        expression: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first use.
///
/// Later calls leave the subscriber in place and report the format the
/// first call selected.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable `--log-filter` and
/// [`TelemetryError::Subscriber`] when a subscriber from elsewhere is already
/// installed.
pub fn initialise(config: &ServerConfig) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config).map(|()| config.log_format))
        .map(|format| TelemetryHandle { format: *format })
}

fn parse_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(expression).map_err(|error| TelemetryError::Filter {
        expression: expression.to_owned(),
        message: error.to_string(),
    })
}

fn install_subscriber(config: &ServerConfig) -> Result<(), TelemetryError> {
    let filter = parse_filter(&config.log_filter)?;
    let colour = !config.log_format.is_structured() && io::stderr().is_terminal();

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(colour)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
