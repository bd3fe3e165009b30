/// Default log filter expression used by the gateway.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// API version the host exposes to plugins.
pub const DEFAULT_HOST_API_VERSION: &str = "1.0.0";

/// Manifests declaring a longer ceiling than this draw a validation warning.
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 60_000;

/// Response notes longer than this draw a validation warning.
pub const DEFAULT_MAX_NOTES_LEN: usize = 512;

/// Default log filter expression used by the gateway.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the gateway.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Owned host API version used by serde defaults.
#[must_use]
pub fn default_host_api_version() -> String {
    DEFAULT_HOST_API_VERSION.to_owned()
}

pub(crate) const fn default_max_timeout_ms() -> u64 {
    DEFAULT_MAX_TIMEOUT_MS
}

pub(crate) const fn default_max_notes_len() -> usize {
    DEFAULT_MAX_NOTES_LEN
}
