//! Configuration for the Warden plugin gateway.
//!
//! [`GatewayConfig`] gathers the knobs the gateway reads at start-up: how
//! plugin handlers are isolated, how diagnostics are logged, where the audit
//! ledger is mirrored, and the thresholds the validator applies to manifests
//! and responses. Configuration is loaded from TOML and every field has a
//! default, so an empty document yields a production-ready configuration.
//!
//! Loading and validation are separate steps. [`GatewayConfig::validate`]
//! fails closed when isolation is disabled outside of test mode; the gateway
//! router calls it before accepting any plugin bindings.

mod defaults;
mod isolation;
mod logging;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_HOST_API_VERSION, DEFAULT_LOG_FILTER, DEFAULT_MAX_NOTES_LEN, DEFAULT_MAX_TIMEOUT_MS,
    default_host_api_version, default_log_filter, default_log_filter_string, default_log_format,
};
pub use isolation::{IsolationMode, IsolationModeParseError};
pub use logging::{LogFormat, LogFormatParseError};

/// Errors raised while loading or validating the gateway configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        /// Path that was read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The configuration document is not valid TOML for [`GatewayConfig`].
    #[error("failed to parse configuration: {source}")]
    Parse {
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// Inline execution was requested without the explicit test-mode flag.
    #[error("isolation mode 'inline' is only permitted when test_mode is enabled")]
    IsolationDisabled,

    /// The host API version is not a `MAJOR.MINOR.PATCH` triple.
    #[error("host_api_version must be MAJOR.MINOR.PATCH, got '{value}'")]
    InvalidApiVersion {
        /// Rejected value.
        value: String,
    },
}

/// Resolved gateway configuration.
///
/// # Example
///
/// ```
/// use warden_config::{GatewayConfig, IsolationMode};
///
/// let config = GatewayConfig::from_toml_str("log_format = \"compact\"")?;
/// assert_eq!(config.isolation(), IsolationMode::Process);
/// config.validate()?;
/// # Ok::<(), warden_config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    isolation: IsolationMode,
    test_mode: bool,
    #[serde(default = "default_log_filter_string")]
    log_filter: String,
    log_format: LogFormat,
    ledger_path: Option<Utf8PathBuf>,
    #[serde(default = "default_host_api_version")]
    host_api_version: String,
    #[serde(default = "defaults::default_max_timeout_ms")]
    max_timeout_ms: u64,
    #[serde(default = "defaults::default_max_notes_len")]
    max_notes_len: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationMode::default(),
            test_mode: false,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            ledger_path: None,
            host_api_version: default_host_api_version(),
            max_timeout_ms: DEFAULT_MAX_TIMEOUT_MS,
            max_notes_len: DEFAULT_MAX_NOTES_LEN,
        }
    }
}

impl GatewayConfig {
    /// Configuration for unit and behaviour tests: inline execution with the
    /// test-mode flag raised.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            isolation: IsolationMode::Inline,
            test_mode: true,
            ..Self::default()
        }
    }

    /// Parses a configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document is malformed or
    /// contains unknown keys.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        toml::from_str(document).map_err(|source| ConfigError::Parse { source })
    }

    /// Reads and parses a configuration file, then validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read, or any
    /// parse or validation error.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let document =
            fs::read_to_string(Path::new(path.as_str())).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source: Arc::new(source),
            })?;
        let config = Self::from_toml_str(&document)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IsolationDisabled`] when inline execution is
    /// configured without `test_mode`, or
    /// [`ConfigError::InvalidApiVersion`] for a malformed host API version.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.isolation.is_isolated() && !self.test_mode {
            return Err(ConfigError::IsolationDisabled);
        }
        if !is_semver_triple(&self.host_api_version) {
            return Err(ConfigError::InvalidApiVersion {
                value: self.host_api_version.clone(),
            });
        }
        Ok(())
    }

    /// Overrides the isolation mode.
    #[must_use]
    pub const fn with_isolation(mut self, isolation: IsolationMode) -> Self {
        self.isolation = isolation;
        self
    }

    /// Raises or lowers the test-mode flag.
    #[must_use]
    pub const fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Mirrors ledger entries to the given NDJSON file.
    #[must_use]
    pub fn with_ledger_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.ledger_path = Some(path.into());
        self
    }

    /// Returns the configured isolation mode.
    #[must_use]
    pub const fn isolation(&self) -> IsolationMode {
        self.isolation
    }

    /// Returns whether the explicit test-mode flag is raised.
    #[must_use]
    pub const fn test_mode(&self) -> bool {
        self.test_mode
    }

    /// Returns the `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the optional NDJSON ledger sink path.
    #[must_use]
    pub fn ledger_path(&self) -> Option<&Utf8Path> {
        self.ledger_path.as_deref()
    }

    /// Returns the API version the host exposes to plugins.
    #[must_use]
    pub fn host_api_version(&self) -> &str {
        &self.host_api_version
    }

    /// Returns the manifest timeout above which validation warns.
    #[must_use]
    pub const fn max_timeout_ms(&self) -> u64 {
        self.max_timeout_ms
    }

    /// Returns the notes length above which response validation warns.
    #[must_use]
    pub const fn max_notes_len(&self) -> usize {
        self.max_notes_len
    }
}

fn is_semver_triple(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}
