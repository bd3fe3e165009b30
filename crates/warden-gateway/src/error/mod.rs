//! Domain errors raised by the gateway.
//!
//! Two families live here. Setup errors ([`GatewayError`], [`RegistryError`])
//! are returned to the embedding host when registration, binding, or
//! configuration fails. [`InvocationFault`] is the closed set of reasons an
//! invocation can fail; it never escapes [`crate::Router::invoke`] as an
//! `Err` but is mapped onto a response status and a stable note.
//!
//! The `Display` text of every variant is meant for logs. Response notes come
//! from [`InvocationFault::note`] only, which never embeds the fault detail.

use std::fmt;

use thiserror::Error;
use warden_config::ConfigError;

use crate::ledger::LedgerError;
use crate::protocol::PluginStatus;
use crate::validator::ValidationIssue;

/// Errors raised by registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The plugin id is not present in the registry.
    #[error("plugin '{plugin_id}' not found in registry")]
    NotFound {
        /// Plugin id that was looked up.
        plugin_id: String,
    },

    /// A plugin with the same id is already registered.
    #[error("plugin '{plugin_id}' already registered")]
    AlreadyRegistered {
        /// Duplicate plugin id.
        plugin_id: String,
    },

    /// The manifest failed validation and was not stored.
    #[error("manifest for '{plugin_id}' failed validation: {}", summarise(.issues))]
    InvalidManifest {
        /// Plugin id declared by the manifest.
        plugin_id: String,
        /// Error-severity findings.
        issues: Vec<ValidationIssue>,
    },

    /// The entry was registered with an invalid signature and cannot be
    /// enabled.
    #[error("plugin '{plugin_id}' was rejected at registration and cannot be enabled")]
    SignatureRejected {
        /// Rejected plugin id.
        plugin_id: String,
    },
}

/// Errors raised while assembling or driving the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The audit ledger could not record a lifecycle event.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A non-isolating launcher was bound while process isolation is
    /// configured.
    #[error("plugin '{plugin_id}' cannot be bound to an inline handler outside test mode")]
    IsolationRequired {
        /// Plugin id the binding targeted.
        plugin_id: String,
    },
}

/// Which message failed schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStage {
    /// The inbound request.
    Request,
    /// The response returned by the isolate.
    Response,
}

impl SchemaStage {
    /// Returns the lowercase stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for SchemaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local policy decisions that refuse an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    /// No plugin with the requested id is registered.
    UnknownPlugin,
    /// The plugin is registered but not enabled.
    PluginDisabled,
    /// The plugin has no handler bound to it.
    HandlerUnbound,
    /// A deterministic-only request targeted a probabilistic plugin.
    NonDeterministic,
    /// The invocation could not be recorded in the audit ledger.
    AuditUnavailable,
}

impl PolicyViolation {
    /// Returns the stable note reported to callers.
    #[must_use]
    pub const fn note(self) -> &'static str {
        match self {
            Self::UnknownPlugin => "plugin not found",
            Self::PluginDisabled => "plugin not enabled",
            Self::HandlerUnbound => "plugin has no bound handler",
            Self::NonDeterministic => {
                "policy violation: deterministic_only request cannot run a probabilistic plugin"
            }
            Self::AuditUnavailable => "audit ledger unavailable",
        }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.note())
    }
}

/// Reasons an invocation can fail.
///
/// Each kind maps to exactly one response status via
/// [`InvocationFault::status`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationFault {
    /// The isolate did not answer within the effective timeout.
    #[error("execution exceeded {timeout_ms}ms")]
    Timeout {
        /// Effective timeout that elapsed.
        timeout_ms: u64,
    },

    /// The isolate could not be started or stopped answering.
    #[error("runtime fault: {detail}")]
    RuntimeFault {
        /// Diagnostic detail for logs.
        detail: String,
    },

    /// The isolate replied with something other than a result message.
    #[error("protocol violation: {detail}")]
    ProtocolViolation {
        /// Diagnostic detail for logs.
        detail: String,
    },

    /// Local policy refused the invocation.
    #[error("{0}")]
    PolicyViolation(PolicyViolation),

    /// A request or response failed structural validation.
    #[error("{stage} failed validation on {}", .fields.join(", "))]
    SchemaInvalid {
        /// Message that failed.
        stage: SchemaStage,
        /// Fields carrying error-severity issues.
        fields: Vec<String>,
    },
}

impl InvocationFault {
    /// Returns the response status this fault produces.
    #[must_use]
    pub const fn status(&self) -> PluginStatus {
        match self {
            Self::Timeout { .. } => PluginStatus::Timeout,
            Self::RuntimeFault { .. } | Self::ProtocolViolation { .. } => PluginStatus::Error,
            Self::PolicyViolation(_) | Self::SchemaInvalid { .. } => PluginStatus::Rejected,
        }
    }

    /// Returns the caller-facing note.
    ///
    /// Runtime and protocol details stay in the logs.
    #[must_use]
    pub fn note(&self) -> String {
        match self {
            Self::Timeout { timeout_ms } => format!("execution timeout after {timeout_ms}ms"),
            Self::RuntimeFault { .. } => "plugin execution failed".to_owned(),
            Self::ProtocolViolation { .. } => "plugin protocol violation".to_owned(),
            Self::PolicyViolation(violation) => violation.note().to_owned(),
            Self::SchemaInvalid { stage, fields } if fields.is_empty() => {
                format!("{stage} failed validation")
            }
            Self::SchemaInvalid { stage, fields } => {
                format!("{stage} failed validation: {}", fields.join(", "))
            }
        }
    }

    /// Returns the short kind label recorded in ledger metadata.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::RuntimeFault { .. } => "runtime_fault",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::PolicyViolation(_) => "policy_violation",
            Self::SchemaInvalid { .. } => "schema_invalid",
        }
    }
}

impl From<PolicyViolation> for InvocationFault {
    fn from(violation: PolicyViolation) -> Self {
        Self::PolicyViolation(violation)
    }
}

fn summarise(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.field(), issue.message()))
        .collect::<Vec<_>>()
        .join("; ")
}
