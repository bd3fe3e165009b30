//! Structured diagnostics for gateway hosts.
//!
//! The gateway only emits `tracing` events; hosts call [`initialise`] once to
//! route them to stderr using the filter and format from [`GatewayConfig`].
//! Plugin stdout is the wire protocol, so nothing here ever writes to stdout.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::UtcTime;
use warden_config::{GatewayConfig, LogFormat};

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();

/// Errors encountered while configuring telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured filter expression did not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Rejected expression.
        filter: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another global subscriber was already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the global subscriber on first call; later calls do nothing.
///
/// ```
/// use warden_config::GatewayConfig;
/// use warden_gateway::telemetry;
///
/// let config = GatewayConfig::default();
/// telemetry::initialise(&config)?;
/// telemetry::initialise(&config)?;
/// # Ok::<(), warden_gateway::telemetry::TelemetryError>(())
/// ```
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for a malformed filter and
/// [`TelemetryError::Subscriber`] when another subscriber owns the global
/// slot.
pub fn initialise(config: &GatewayConfig) -> Result<(), TelemetryError> {
    SUBSCRIBER_INSTALLED
        .get_or_try_init(|| {
            let subscriber = build_subscriber(config)?;
            tracing::subscriber::set_global_default(subscriber)
                .map_err(TelemetryError::Subscriber)
        })
        .map(|_| ())
}

/// Builds the stderr subscriber without installing it.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for a malformed filter.
pub fn build_subscriber(
    config: &GatewayConfig,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError> {
    let filter =
        EnvFilter::try_new(config.log_filter()).map_err(|error| TelemetryError::Filter {
            filter: config.log_filter().to_owned(),
            message: error.to_string(),
        })?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    Ok(subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use warden_config::{GatewayConfig, LogFormat};

    use super::*;

    #[rstest]
    #[case::json("log_format = \"json\"", LogFormat::Json)]
    #[case::compact("log_format = \"compact\"", LogFormat::Compact)]
    fn both_formats_build(#[case] document: &str, #[case] format: LogFormat) {
        let config = GatewayConfig::from_toml_str(document).expect("config");
        assert_eq!(config.log_format(), format);
        assert!(build_subscriber(&config).is_ok());
    }

    #[test]
    fn malformed_filter_is_reported() {
        let config =
            GatewayConfig::from_toml_str("log_filter = \"warden=notalevel\"").expect("config");
        let error = build_subscriber(&config).err().expect("filter error");
        assert!(matches!(error, TelemetryError::Filter { .. }));
        assert!(error.to_string().contains("warden=notalevel"));
    }
}
