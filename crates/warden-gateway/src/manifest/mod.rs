//! Plugin manifest types.
//!
//! A [`PluginManifest`] is the static declaration a plugin vendor ships:
//! identity, declared capabilities, I/O contract, resource limits,
//! determinism mode, and the worker entrypoint the gateway launches. The
//! gateway never trusts a manifest it has not validated; see
//! [`crate::Validator::validate_manifest`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default hard execution ceiling in milliseconds.
const DEFAULT_MAX_MS: u64 = 5_000;
/// Default ceiling on serialized payload and result size.
const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
/// Default memory ceiling in mebibytes.
const DEFAULT_MAX_MEMORY_MB: u64 = 128;
/// Default API version a manifest targets.
const DEFAULT_API_VERSION: &str = "1.0.0";

/// Capabilities a plugin may declare.
pub mod capability {
    /// Reads plain-text payloads.
    pub const READ_TEXT: &str = "read_text";
    /// Reads structured JSON payloads.
    pub const READ_JSON: &str = "read_json";
    /// Reads document metadata.
    pub const READ_METADATA: &str = "read_metadata";
    /// Emits suggestions for the host to review.
    pub const WRITE_SUGGESTION: &str = "write_suggestion";
    /// Emits analysis reports.
    pub const WRITE_REPORT: &str = "write_report";

    /// Capabilities the gateway understands.
    pub const ALLOWED: &[&str] = &[
        READ_TEXT,
        READ_JSON,
        READ_METADATA,
        WRITE_SUGGESTION,
        WRITE_REPORT,
    ];

    /// Ambient authority no plugin may request.
    pub const FORBIDDEN: &[&str] = &[
        "filesystem_access",
        "network_access",
        "process_spawn",
        "env_access",
    ];

    /// Returns the read capability an input kind depends on.
    #[must_use]
    pub fn required_for_input(kind: &str) -> Option<&'static str> {
        match kind {
            "text" => Some(READ_TEXT),
            "json" => Some(READ_JSON),
            "metadata" => Some(READ_METADATA),
            _ => None,
        }
    }
}

/// Whether a plugin produces the same output for the same input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeterminismMode {
    /// Identical inputs yield identical outputs.
    #[default]
    Deterministic,
    /// Output may vary between runs.
    Probabilistic,
}

impl DeterminismMode {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Probabilistic => "probabilistic",
        }
    }
}

impl fmt::Display for DeterminismMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared determinism with free-form vendor notes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Determinism {
    mode: DeterminismMode,
    #[serde(default)]
    notes: String,
}

impl Determinism {
    /// Creates a determinism declaration.
    #[must_use]
    pub fn new(mode: DeterminismMode, notes: impl Into<String>) -> Self {
        Self {
            mode,
            notes: notes.into(),
        }
    }

    /// Returns the declared mode.
    #[must_use]
    pub const fn mode(&self) -> DeterminismMode {
        self.mode
    }

    /// Returns the vendor notes.
    #[must_use]
    pub fn notes(&self) -> &str {
        &self.notes
    }
}

/// Resource ceilings enforced on every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    /// Hard wall-clock ceiling in milliseconds.
    pub max_ms: u64,
    /// Ceiling on the serialized payload and result, in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Memory ceiling for the isolate, in mebibytes.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    /// Advisory number of concurrent invocations the vendor supports.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

impl ResourceLimits {
    /// Returns the memory ceiling in bytes.
    #[must_use]
    pub const fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_ms: DEFAULT_MAX_MS,
            max_bytes: DEFAULT_MAX_BYTES,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// One declared input or output channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoSpec {
    /// Content kind, such as `text` or `json`.
    pub kind: String,
    /// Reference to the schema the content follows.
    #[serde(default)]
    pub schema_ref: String,
    /// Size ceiling for this channel.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl IoSpec {
    /// Creates an I/O declaration with the default size ceiling.
    #[must_use]
    pub fn new(kind: impl Into<String>, schema_ref: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            schema_ref: schema_ref.into(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Declared inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoContract {
    /// Inputs the plugin consumes.
    #[serde(default)]
    pub inputs: Vec<IoSpec>,
    /// Outputs the plugin produces.
    #[serde(default)]
    pub outputs: Vec<IoSpec>,
}

/// How the gateway starts a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrypointKind {
    /// A worker that exchanges one `invoke` and one `result` message.
    #[default]
    Worker,
}

/// Entrypoint descriptor: the module the isolate runs and the exported
/// handler it calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entrypoint {
    #[serde(default)]
    kind: EntrypointKind,
    module: PathBuf,
    export: String,
    #[serde(default)]
    args: Vec<String>,
}

impl Entrypoint {
    /// Creates a worker entrypoint.
    #[must_use]
    pub fn new(module: impl Into<PathBuf>, export: impl Into<String>) -> Self {
        Self {
            kind: EntrypointKind::Worker,
            module: module.into(),
            export: export.into(),
            args: Vec::new(),
        }
    }

    /// Sets the arguments passed to the module.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the entrypoint kind.
    #[must_use]
    pub const fn kind(&self) -> EntrypointKind {
        self.kind
    }

    /// Returns the module path the isolate executes.
    #[must_use]
    pub fn module(&self) -> &Path {
        &self.module
    }

    /// Returns the exported handler name.
    #[must_use]
    pub fn export(&self) -> &str {
        &self.export
    }

    /// Returns the module arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Declarative description of one plugin.
///
/// # Example
///
/// ```
/// use warden_gateway::manifest::{DeterminismMode, Entrypoint, PluginManifest};
///
/// let manifest = PluginManifest::new(
///     "acme.echo",
///     "Echo",
///     "1.0.0",
///     Entrypoint::new("/usr/libexec/warden/echo", "handle"),
/// );
///
/// assert_eq!(manifest.plugin_id(), "acme.echo");
/// assert_eq!(manifest.determinism().mode(), DeterminismMode::Deterministic);
/// assert_eq!(manifest.limits().max_ms, 5_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    plugin_id: String,
    name: String,
    #[serde(default)]
    vendor: String,
    #[serde(default)]
    description: String,
    version: String,
    #[serde(default = "default_api_version")]
    api_version: String,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    io: IoContract,
    #[serde(default)]
    limits: ResourceLimits,
    #[serde(default)]
    determinism: Determinism,
    entrypoint: Entrypoint,
}

impl PluginManifest {
    /// Creates a manifest with default limits, deterministic mode, and no
    /// capabilities.
    #[must_use]
    pub fn new(
        plugin_id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        entrypoint: Entrypoint,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            name: name.into(),
            vendor: String::new(),
            description: String::new(),
            version: version.into(),
            api_version: default_api_version(),
            capabilities: Vec::new(),
            io: IoContract::default(),
            limits: ResourceLimits::default(),
            determinism: Determinism::default(),
            entrypoint,
        }
    }

    /// Sets the vendor name.
    #[must_use]
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the host API version the plugin targets.
    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Replaces the declared capabilities.
    #[must_use]
    pub fn with_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the I/O contract.
    #[must_use]
    pub fn with_io(mut self, io: IoContract) -> Self {
        self.io = io;
        self
    }

    /// Replaces the resource limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the hard execution ceiling.
    #[must_use]
    pub const fn with_max_ms(mut self, max_ms: u64) -> Self {
        self.limits.max_ms = max_ms;
        self
    }

    /// Replaces the determinism declaration.
    #[must_use]
    pub fn with_determinism(mut self, determinism: Determinism) -> Self {
        self.determinism = determinism;
        self
    }

    /// Returns the unique plugin id.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the vendor name.
    #[must_use]
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the plugin version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the targeted host API version.
    #[must_use]
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Returns the declared capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Returns whether the manifest declares `capability`.
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|declared| declared == capability)
    }

    /// Returns the I/O contract.
    #[must_use]
    pub const fn io(&self) -> &IoContract {
        &self.io
    }

    /// Returns the resource limits.
    #[must_use]
    pub const fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Returns the determinism declaration.
    #[must_use]
    pub const fn determinism(&self) -> &Determinism {
        &self.determinism
    }

    /// Returns the entrypoint descriptor.
    #[must_use]
    pub const fn entrypoint(&self) -> &Entrypoint {
        &self.entrypoint
    }
}

const fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

const fn default_max_memory_mb() -> u64 {
    DEFAULT_MAX_MEMORY_MB
}

const fn default_max_concurrency() -> u32 {
    1
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_owned()
}
