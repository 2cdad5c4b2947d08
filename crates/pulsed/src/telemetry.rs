//! Structured telemetry initialisation for the daemon.
//!
//! Plugin stdout is forwarded to `tracing` at `debug` under the
//! `pulse_control::process` target. Unless the configured filter names that
//! target itself, it is capped at `info` so a global `debug` filter does not
//! interleave plugin chatter with control-plane events.

use std::fmt::Display;
use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, info, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use pulse_config::{Config, LogFormat};

const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

/// Target carrying forwarded plugin output.
const PLUGIN_OUTPUT_TARGET: &str = "pulse_control::process";

/// Directive applied when the configured filter leaves plugin output unset.
const PLUGIN_OUTPUT_DIRECTIVE: &str = "pulse_control::process=info";

static INSTALLED_FORMAT: OnceCell<LogFormat> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Returns the output format of the installed subscriber.
    #[must_use]
    pub const fn format(self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Filter expression as configured.
        filter: String,
        /// Parser message.
        message: String,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Later calls return a handle describing the subscriber that is already
/// installed, even if their configuration differs.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] when the filter expression does not
/// parse and [`TelemetryError::Subscriber`] when another subscriber was
/// installed outside this module.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED_FORMAT
        .get_or_try_init(|| install_subscriber(config))
        .map(|format| TelemetryHandle { format: *format })
}

/// Builds the daemon's filter from the configured expression.
pub(crate) fn daemon_filter(expression: &str) -> Result<EnvFilter, TelemetryError> {
    let filter =
        EnvFilter::try_new(expression).map_err(|error| filter_error(expression, &error))?;
    if expression.contains(PLUGIN_OUTPUT_TARGET) {
        return Ok(filter);
    }
    let directive = PLUGIN_OUTPUT_DIRECTIVE
        .parse()
        .map_err(|error| filter_error(PLUGIN_OUTPUT_DIRECTIVE, &error))?;
    Ok(filter.add_directive(directive))
}

fn filter_error(expression: &str, error: &impl Display) -> TelemetryError {
    TelemetryError::Filter {
        filter: expression.to_owned(),
        message: error.to_string(),
    }
}

fn install_subscriber(config: &Config) -> Result<LogFormat, TelemetryError> {
    let filter = daemon_filter(config.log_filter())?;
    let format = config.log_format();

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(io::stderr)
            .with_ansi(!format.is_structured() && io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    info!(
        target: TELEMETRY_TARGET,
        format = %format,
        filter = config.log_filter(),
        "telemetry initialised"
    );
    Ok(format)
}
