//! Structural and policy checks for manifests, requests, responses, and
//! pipelines.
//!
//! Every check returns severity-tagged [`ValidationIssue`]s instead of
//! failing. Callers decide what an `error` issue means: the registry refuses
//! the manifest, the router rejects the request or downgrades the response.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use warden_config::GatewayConfig;

use crate::evidence::{self, is_content_hash};
use crate::manifest::{PluginManifest, capability};
use crate::protocol::{PluginRequest, PluginResponse, PluginStatus};
use crate::router::{PipelinePolicy, PipelineStrategy};

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks registration or invocation.
    Error,
    /// Reported but tolerated.
    Warning,
}

impl Severity {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    field: String,
    severity: Severity,
    message: String,
}

impl ValidationIssue {
    /// Creates an issue.
    #[must_use]
    pub fn new(field: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            severity,
            message: message.into(),
        }
    }

    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, Severity::Error, message)
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, Severity::Warning, message)
    }

    /// Returns the offending field path.
    #[must_use]
    pub const fn field(&self) -> &str {
        self.field.as_str()
    }

    /// Returns the severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns the human-readable message.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Returns whether this issue is error-severity.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

/// Returns whether any issue is error-severity.
#[must_use]
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(ValidationIssue::is_error)
}

/// Returns the distinct fields that carry error-severity issues, in order.
#[must_use]
pub fn error_fields(issues: &[ValidationIssue]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    issues
        .iter()
        .filter(|issue| issue.is_error())
        .filter(|issue| seen.insert(issue.field.clone()))
        .map(|issue| issue.field.clone())
        .collect()
}

/// Outcome of manifest validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestReport {
    /// `true` when no error-severity issue was found.
    pub valid: bool,
    /// All findings, errors first in discovery order.
    pub issues: Vec<ValidationIssue>,
    /// Content hash of the manifest; empty when the document did not parse.
    pub manifest_hash: String,
}

/// Thresholds the validator applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorPolicy {
    host_api_version: String,
    max_timeout_ms: u64,
    max_notes_len: usize,
}

impl ValidatorPolicy {
    /// Reads the thresholds from gateway configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            host_api_version: config.host_api_version().to_owned(),
            max_timeout_ms: config.max_timeout_ms(),
            max_notes_len: config.max_notes_len(),
        }
    }
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Stateless validator parameterised by a [`ValidatorPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
    policy: ValidatorPolicy,
}

impl Validator {
    /// Creates a validator with the given thresholds.
    #[must_use]
    pub const fn new(policy: ValidatorPolicy) -> Self {
        Self { policy }
    }

    /// Checks a manifest and computes its content hash.
    #[must_use]
    pub fn validate_manifest(&self, manifest: &PluginManifest) -> ManifestReport {
        let mut issues = Vec::new();
        self.check_identity(manifest, &mut issues);
        check_capabilities(manifest, &mut issues);
        check_entrypoint(manifest, &mut issues);
        self.check_limits(manifest, &mut issues);
        if manifest.description().trim().is_empty() {
            issues.push(ValidationIssue::warning("description", "description is empty"));
        }

        let manifest_hash = evidence::hash_serializable(manifest).unwrap_or_default();
        issues.sort_by_key(|issue| issue.severity() != Severity::Error);
        ManifestReport {
            valid: !has_errors(&issues),
            issues,
            manifest_hash,
        }
    }

    /// Parses a raw JSON manifest and validates it.
    ///
    /// Missing, mistyped, or unknown fields produce a single `manifest`
    /// error issue.
    #[must_use]
    pub fn validate_manifest_json(&self, document: &str) -> ManifestReport {
        match serde_json::from_str::<PluginManifest>(document) {
            Ok(manifest) => self.validate_manifest(&manifest),
            Err(error) => ManifestReport {
                valid: false,
                issues: vec![ValidationIssue::error(
                    "manifest",
                    format!("manifest does not match the schema: {error}"),
                )],
                manifest_hash: String::new(),
            },
        }
    }

    /// Checks a request on its own.
    #[must_use]
    pub fn validate_request(&self, request: &PluginRequest) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if request.run_id().trim().is_empty() {
            issues.push(ValidationIssue::error("run_id", "run_id is required"));
        }
        if request.request_id().trim().is_empty() {
            issues.push(ValidationIssue::error("request_id", "request_id is required"));
        }
        if request.payload().is_null() {
            issues.push(ValidationIssue::error("payload", "payload is required"));
        }
        if request.policy().timeout_ms() == 0 {
            issues.push(ValidationIssue::error(
                "policy.timeout_ms",
                "timeout_ms must be positive",
            ));
        }
        issues
    }

    /// Checks a request against the target plugin's declared limits.
    #[must_use]
    pub fn validate_request_limits(
        &self,
        manifest: &PluginManifest,
        request: &PluginRequest,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let size = serialized_len(request.payload());
        if size > manifest.limits().max_bytes {
            issues.push(ValidationIssue::error(
                "payload",
                format!(
                    "payload is {size} bytes, limit is {}",
                    manifest.limits().max_bytes
                ),
            ));
        }
        issues
    }

    /// Checks a response produced for `request` by `manifest`'s plugin.
    #[must_use]
    pub fn validate_response(
        &self,
        response: &PluginResponse,
        manifest: &PluginManifest,
        request: &PluginRequest,
    ) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if response.request_id() != request.request_id() {
            issues.push(ValidationIssue::error(
                "request_id",
                "response request_id does not match the request",
            ));
        }
        if response.plugin_id() != manifest.plugin_id() {
            issues.push(ValidationIssue::error(
                "plugin_id",
                "response plugin_id does not match the plugin",
            ));
        }
        check_hashes(response, &mut issues);
        if response.status() == PluginStatus::Ok && response.result().is_null() {
            issues.push(ValidationIssue::error("result", "ok response carries no result"));
        }
        let size = serialized_len(response.result());
        if size > manifest.limits().max_bytes {
            issues.push(ValidationIssue::error(
                "result",
                format!(
                    "result is {size} bytes, limit is {}",
                    manifest.limits().max_bytes
                ),
            ));
        }
        if response.notes().len() > self.policy.max_notes_len {
            issues.push(ValidationIssue::warning(
                "notes",
                format!("notes exceed {} bytes", self.policy.max_notes_len),
            ));
        }
        issues
    }

    /// Checks a pipeline policy.
    #[must_use]
    pub fn validate_pipeline(&self, policy: &PipelinePolicy) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if policy.plugin_ids().is_empty() {
            issues.push(ValidationIssue::error(
                "plugin_ids",
                "pipeline lists no plugins",
            ));
        }
        if policy.strategy() == PipelineStrategy::FanOut {
            let mut seen = BTreeSet::new();
            for plugin_id in policy.plugin_ids() {
                if !seen.insert(plugin_id.as_str()) {
                    issues.push(ValidationIssue::error(
                        "plugin_ids",
                        format!("fan-out lists '{plugin_id}' more than once"),
                    ));
                }
            }
        }
        if policy.timeout_ms() == Some(0) {
            issues.push(ValidationIssue::error(
                "timeout_ms",
                "pipeline timeout_ms must be positive",
            ));
        }
        issues
    }

    fn check_identity(&self, manifest: &PluginManifest, issues: &mut Vec<ValidationIssue>) {
        if manifest.plugin_id().is_empty() {
            issues.push(ValidationIssue::error("plugin_id", "plugin_id is required"));
        } else if !is_plugin_id(manifest.plugin_id()) {
            issues.push(ValidationIssue::error(
                "plugin_id",
                "plugin_id must match [a-z0-9][a-z0-9._-]*",
            ));
        }
        if manifest.name().trim().is_empty() {
            issues.push(ValidationIssue::error("name", "name is required"));
        }
        if parse_semver(manifest.version()).is_none() {
            issues.push(ValidationIssue::error(
                "version",
                "version must be MAJOR.MINOR.PATCH",
            ));
        }
        match parse_semver(manifest.api_version()) {
            None => issues.push(ValidationIssue::error(
                "api_version",
                "api_version must be MAJOR.MINOR.PATCH",
            )),
            Some((0, _, _)) => issues.push(ValidationIssue::error(
                "api_version",
                "api_version major 0 is not supported",
            )),
            Some((major, _, _)) => {
                let host_major = parse_semver(&self.policy.host_api_version).map(|(m, _, _)| m);
                if host_major != Some(major) {
                    issues.push(ValidationIssue::error(
                        "api_version",
                        format!(
                            "api_version {} is incompatible with host API {}",
                            manifest.api_version(),
                            self.policy.host_api_version
                        ),
                    ));
                }
            }
        }
    }

    fn check_limits(&self, manifest: &PluginManifest, issues: &mut Vec<ValidationIssue>) {
        let limits = manifest.limits();
        if limits.max_ms == 0 {
            issues.push(ValidationIssue::error("limits.max_ms", "max_ms must be positive"));
        } else if limits.max_ms > self.policy.max_timeout_ms {
            issues.push(ValidationIssue::warning(
                "limits.max_ms",
                format!(
                    "max_ms {} exceeds the recommended ceiling of {}ms",
                    limits.max_ms, self.policy.max_timeout_ms
                ),
            ));
        }
        if limits.max_memory_mb == 0 {
            issues.push(ValidationIssue::error(
                "limits.max_memory_mb",
                "max_memory_mb must be positive",
            ));
        }
        if limits.max_bytes == 0 {
            issues.push(ValidationIssue::error(
                "limits.max_bytes",
                "max_bytes must be positive",
            ));
        }
    }
}

fn check_capabilities(manifest: &PluginManifest, issues: &mut Vec<ValidationIssue>) {
    for declared in manifest.capabilities() {
        if capability::FORBIDDEN.contains(&declared.as_str()) {
            issues.push(ValidationIssue::error(
                "capabilities",
                format!("Forbidden capability: {declared}"),
            ));
        } else if !capability::ALLOWED.contains(&declared.as_str()) {
            issues.push(ValidationIssue::error(
                "capabilities",
                format!("Unknown capability: {declared}"),
            ));
        }
    }
    for input in &manifest.io().inputs {
        if let Some(required) = capability::required_for_input(&input.kind) {
            if !manifest.has_capability(required) {
                issues.push(ValidationIssue::error(
                    "io.inputs",
                    format!("input kind '{}' requires capability {required}", input.kind),
                ));
            }
        }
    }
}

fn check_entrypoint(manifest: &PluginManifest, issues: &mut Vec<ValidationIssue>) {
    let entrypoint = manifest.entrypoint();
    if !entrypoint.module().is_absolute() {
        issues.push(ValidationIssue::error(
            "entrypoint.module",
            "entrypoint module must be an absolute path",
        ));
    }
    if entrypoint.export().trim().is_empty() {
        issues.push(ValidationIssue::error(
            "entrypoint.export",
            "entrypoint export is required",
        ));
    }
}

fn check_hashes(response: &PluginResponse, issues: &mut Vec<ValidationIssue>) {
    let hashes = response.evidence_hashes();
    if !is_content_hash(&hashes.input_hash) {
        issues.push(ValidationIssue::error(
            "evidence_hashes.input_hash",
            "input_hash must be a SHA-256 hex digest",
        ));
    }
    let output_hash = hashes.output_hash.as_str();
    if !output_hash.is_empty() && !is_content_hash(output_hash) {
        issues.push(ValidationIssue::error(
            "evidence_hashes.output_hash",
            "output_hash must be empty or a SHA-256 hex digest",
        ));
    }
    if output_hash.is_empty() != response.result().is_null() {
        issues.push(ValidationIssue::error(
            "evidence_hashes.output_hash",
            "output_hash must be present exactly when a result is present",
        ));
    }
}

fn serialized_len(value: &serde_json::Value) -> u64 {
    if value.is_null() {
        return 0;
    }
    u64::try_from(evidence::canonical_json(value).len()).unwrap_or(u64::MAX)
}

fn is_plugin_id(candidate: &str) -> bool {
    let mut bytes = candidate.bytes();
    bytes
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first.is_ascii_digit())
        && bytes.all(|byte| {
            byte.is_ascii_lowercase() || byte.is_ascii_digit() || matches!(byte, b'.' | b'_' | b'-')
        })
}

fn parse_semver(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.').map(|part| {
        if part.is_empty() || !part.bytes().all(|byte| byte.is_ascii_digit()) {
            None
        } else {
            part.parse::<u64>().ok()
        }
    });
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next()??;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
