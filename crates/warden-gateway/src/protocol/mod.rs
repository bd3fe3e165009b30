//! Request, response, and wire message types.
//!
//! The host and an isolate exchange exactly two messages per invocation,
//! each a single JSON line: the gateway sends [`HostMessage::Invoke`] and
//! the isolate answers with [`IsolateMessage::Result`]. Any other shape from
//! the isolate is a protocol violation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller policy attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestPolicy {
    #[serde(default)]
    deterministic_only: bool,
    timeout_ms: u64,
}

impl RequestPolicy {
    /// Creates a policy with the given timeout that accepts any determinism
    /// mode.
    #[must_use]
    pub const fn new(timeout_ms: u64) -> Self {
        Self {
            deterministic_only: false,
            timeout_ms,
        }
    }

    /// Restricts the request to deterministic plugins.
    #[must_use]
    pub const fn deterministic_only(mut self) -> Self {
        self.deterministic_only = true;
        self
    }

    /// Returns whether only deterministic plugins may serve the request.
    #[must_use]
    pub const fn requires_determinism(&self) -> bool {
        self.deterministic_only
    }

    /// Returns the caller-requested timeout.
    #[must_use]
    pub const fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

/// One invocation request created by the host.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use warden_gateway::protocol::{PluginRequest, RequestPolicy};
///
/// let request = PluginRequest::new("run-1", "req-1", json!({"text": "hi"}), RequestPolicy::new(1000));
/// assert_eq!(request.request_id(), "req-1");
/// assert!(!request.policy().requires_determinism());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginRequest {
    run_id: String,
    request_id: String,
    payload: Value,
    #[serde(default)]
    context: Map<String, Value>,
    policy: RequestPolicy,
}

impl PluginRequest {
    /// Creates a request with an empty context.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        request_id: impl Into<String>,
        payload: Value,
        policy: RequestPolicy,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            request_id: request_id.into(),
            payload,
            context: Map::new(),
            policy,
        }
    }

    /// Attaches opaque host context forwarded to the plugin.
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Derives the request a pipeline step runs with.
    ///
    /// The step gets the id `<request_id>#<step_index>` and a timeout no
    /// larger than `timeout_cap_ms`.
    #[must_use]
    pub fn for_step(&self, step_index: usize, timeout_cap_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_cap_ms.map_or(self.policy.timeout_ms, |cap| {
            cap.min(self.policy.timeout_ms)
        });
        Self {
            run_id: self.run_id.clone(),
            request_id: format!("{}#{step_index}", self.request_id),
            payload: self.payload.clone(),
            context: self.context.clone(),
            policy: RequestPolicy {
                timeout_ms,
                ..self.policy
            },
        }
    }

    /// Returns the run identifier.
    #[must_use]
    pub const fn run_id(&self) -> &str {
        self.run_id.as_str()
    }

    /// Returns the request identifier.
    #[must_use]
    pub const fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    /// Returns the opaque payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the host context.
    #[must_use]
    pub const fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Returns the caller policy.
    #[must_use]
    pub const fn policy(&self) -> &RequestPolicy {
        &self.policy
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    /// The handler completed and its response passed validation.
    Ok,
    /// The isolate failed or broke the protocol.
    Error,
    /// Local policy or validation refused the invocation or its response.
    Rejected,
    /// The effective timeout elapsed.
    Timeout,
}

impl PluginStatus {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }

    /// Returns whether this is [`PluginStatus::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content hashes binding a response to its input and output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceHashes {
    /// Hash of the request payload.
    #[serde(default)]
    pub input_hash: String,
    /// Hash of the result, empty when the result is null.
    #[serde(default)]
    pub output_hash: String,
}

/// Response returned for every invocation.
///
/// Handlers build one with [`PluginResponse::ok`], [`PluginResponse::error`],
/// or [`PluginResponse::rejected`]. The gateway overwrites the identifiers,
/// hashes, and duration with values it computed itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginResponse {
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    plugin_id: String,
    status: PluginStatus,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    evidence_hashes: EvidenceHashes,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    notes: String,
}

impl PluginResponse {
    fn with_status(status: PluginStatus, result: Value, notes: String) -> Self {
        Self {
            request_id: String::new(),
            plugin_id: String::new(),
            status,
            result,
            evidence_hashes: EvidenceHashes::default(),
            duration_ms: 0,
            notes,
        }
    }

    /// Successful response carrying `result`.
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self::with_status(PluginStatus::Ok, result, String::new())
    }

    /// Handler-reported failure.
    #[must_use]
    pub fn error(notes: impl Into<String>) -> Self {
        Self::with_status(PluginStatus::Error, Value::Null, notes.into())
    }

    /// Handler-reported refusal.
    #[must_use]
    pub fn rejected(notes: impl Into<String>) -> Self {
        Self::with_status(PluginStatus::Rejected, Value::Null, notes.into())
    }

    /// Adds notes to the response.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Gateway-built response with every field supplied.
    pub(crate) fn stamped(
        request_id: &str,
        plugin_id: &str,
        status: PluginStatus,
        result: Value,
        evidence_hashes: EvidenceHashes,
        duration_ms: u64,
        notes: String,
    ) -> Self {
        Self {
            request_id: request_id.to_owned(),
            plugin_id: plugin_id.to_owned(),
            status,
            result,
            evidence_hashes,
            duration_ms,
            notes,
        }
    }

    /// Splits a handler reply into status, result, and notes.
    pub(crate) fn into_parts(self) -> (PluginStatus, Value, String) {
        (self.status, self.result, self.notes)
    }

    /// Drops the result and marks the response rejected.
    pub(crate) fn into_rejected(mut self, notes: String) -> Self {
        self.status = PluginStatus::Rejected;
        self.result = Value::Null;
        self.evidence_hashes.output_hash.clear();
        self.notes = notes;
        self
    }

    /// Returns the request identifier.
    #[must_use]
    pub const fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    /// Returns the plugin identifier.
    #[must_use]
    pub const fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Returns the outcome.
    #[must_use]
    pub const fn status(&self) -> PluginStatus {
        self.status
    }

    /// Returns the result, `Value::Null` when absent.
    #[must_use]
    pub const fn result(&self) -> &Value {
        &self.result
    }

    /// Returns the evidence hashes.
    #[must_use]
    pub const fn evidence_hashes(&self) -> &EvidenceHashes {
        &self.evidence_hashes
    }

    /// Returns the measured duration.
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Returns the notes.
    #[must_use]
    pub const fn notes(&self) -> &str {
        self.notes.as_str()
    }
}

/// Message the gateway sends to an isolate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum HostMessage {
    /// Run the handler against `request`.
    Invoke {
        /// Request to handle.
        request: PluginRequest,
    },
}

/// Message an isolate sends back to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum IsolateMessage {
    /// The handler's response.
    Result {
        /// Response produced by the handler.
        response: PluginResponse,
    },
}
