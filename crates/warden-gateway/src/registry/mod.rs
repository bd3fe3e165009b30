//! Plugin registry.
//!
//! The [`PluginRegistry`] stores validated manifests keyed by plugin id,
//! together with the signature verdict and the enabled flag. Entries are
//! immutable snapshots behind an `Arc`; every mutation swaps in a whole new
//! entry under the write lock, so readers on the invocation path never see a
//! half-updated record.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::manifest::PluginManifest;
use crate::validator::{Severity, ValidationIssue, Validator};

const REGISTRY_TARGET: &str = "warden_gateway::registry";

/// Verdict recorded at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// The signature verified; the plugin may be enabled.
    Registered,
    /// The signature did not verify; the plugin can never be enabled.
    Rejected,
}

impl RegistrationStatus {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Rejected => "rejected",
        }
    }
}

/// Snapshot of one registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    manifest: PluginManifest,
    manifest_hash: String,
    signature: String,
    signature_valid: bool,
    status: RegistrationStatus,
    enabled: bool,
    registered_at: String,
    warnings: Vec<ValidationIssue>,
}

impl RegistryEntry {
    /// Returns the manifest.
    #[must_use]
    pub const fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// Returns the plugin id.
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        self.manifest.plugin_id()
    }

    /// Returns the manifest content hash.
    #[must_use]
    pub const fn manifest_hash(&self) -> &str {
        self.manifest_hash.as_str()
    }

    /// Returns the vendor signature supplied at registration.
    #[must_use]
    pub const fn signature(&self) -> &str {
        self.signature.as_str()
    }

    /// Returns whether the signature verified.
    #[must_use]
    pub const fn signature_valid(&self) -> bool {
        self.signature_valid
    }

    /// Returns the registration verdict.
    #[must_use]
    pub const fn status(&self) -> RegistrationStatus {
        self.status
    }

    /// Returns whether the plugin currently accepts invocations.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the registration timestamp.
    #[must_use]
    pub const fn registered_at(&self) -> &str {
        self.registered_at.as_str()
    }

    /// Returns warnings raised when the manifest was validated.
    #[must_use]
    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }
}

/// Thread-safe registry of plugin manifests.
///
/// # Example
///
/// ```
/// use warden_gateway::manifest::{Entrypoint, PluginManifest};
/// use warden_gateway::PluginRegistry;
///
/// let registry = PluginRegistry::default();
/// let manifest = PluginManifest::new(
///     "acme.echo",
///     "Echo",
///     "1.0.0",
///     Entrypoint::new("/usr/libexec/warden/echo", "handle"),
/// )
/// .with_description("Echoes its payload");
///
/// registry.register(manifest, "sig", true, "2026-01-01T00:00:00Z")?;
/// assert!(registry.has("acme.echo"));
/// assert!(!registry.is_enabled("acme.echo"));
///
/// registry.enable("acme.echo")?;
/// assert!(registry.is_enabled("acme.echo"));
/// # Ok::<(), warden_gateway::RegistryError>(())
/// ```
#[derive(Debug, Default)]
pub struct PluginRegistry {
    validator: Validator,
    entries: RwLock<HashMap<String, Arc<RegistryEntry>>>,
}

impl PluginRegistry {
    /// Creates an empty registry that validates manifests with `validator`.
    #[must_use]
    pub fn new(validator: Validator) -> Self {
        Self {
            validator,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Validates and stores a manifest. New entries start disabled.
    ///
    /// An invalid signature still stores the entry, with status
    /// [`RegistrationStatus::Rejected`], so the refusal stays auditable.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidManifest`] when validation finds an
    /// error, or [`RegistryError::AlreadyRegistered`] for a duplicate id.
    pub fn register(
        &self,
        manifest: PluginManifest,
        signature: impl Into<String>,
        signature_valid: bool,
        registered_at: impl Into<String>,
    ) -> Result<Arc<RegistryEntry>, RegistryError> {
        let report = self.validator.validate_manifest(&manifest);
        let plugin_id = manifest.plugin_id().to_owned();
        if !report.valid {
            return Err(RegistryError::InvalidManifest {
                plugin_id,
                issues: report
                    .issues
                    .into_iter()
                    .filter(ValidationIssue::is_error)
                    .collect(),
            });
        }

        let status = if signature_valid {
            RegistrationStatus::Registered
        } else {
            RegistrationStatus::Rejected
        };
        let entry = Arc::new(RegistryEntry {
            manifest,
            manifest_hash: report.manifest_hash,
            signature: signature.into(),
            signature_valid,
            status,
            enabled: false,
            registered_at: registered_at.into(),
            warnings: report
                .issues
                .into_iter()
                .filter(|issue| issue.severity() == Severity::Warning)
                .collect(),
        });

        let mut entries = self.write();
        if entries.contains_key(&plugin_id) {
            return Err(RegistryError::AlreadyRegistered { plugin_id });
        }
        entries.insert(plugin_id.clone(), Arc::clone(&entry));
        drop(entries);

        info!(
            target: REGISTRY_TARGET,
            plugin = %plugin_id,
            status = status.as_str(),
            "plugin registered"
        );
        Ok(entry)
    }

    /// Enables a registered plugin. Enabling twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id or
    /// [`RegistryError::SignatureRejected`] for a rejected entry.
    pub fn enable(&self, plugin_id: &str) -> Result<Arc<RegistryEntry>, RegistryError> {
        self.set_enabled(plugin_id, true)
    }

    /// Disables a registered plugin. Disabling twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id or
    /// [`RegistryError::SignatureRejected`] for a rejected entry.
    pub fn disable(&self, plugin_id: &str) -> Result<Arc<RegistryEntry>, RegistryError> {
        self.set_enabled(plugin_id, false)
    }

    /// Returns whether `plugin_id` is registered.
    #[must_use]
    pub fn has(&self, plugin_id: &str) -> bool {
        self.read().contains_key(plugin_id)
    }

    /// Returns whether `plugin_id` is registered and enabled.
    #[must_use]
    pub fn is_enabled(&self, plugin_id: &str) -> bool {
        self.read()
            .get(plugin_id)
            .is_some_and(|entry| entry.is_enabled())
    }

    /// Returns a snapshot of the entry for `plugin_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when the id is unknown.
    pub fn get(&self, plugin_id: &str) -> Result<Arc<RegistryEntry>, RegistryError> {
        self.read()
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                plugin_id: plugin_id.to_owned(),
            })
    }

    /// Returns snapshots of every entry, sorted by plugin id.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<RegistryEntry>> {
        let mut entries: Vec<Arc<RegistryEntry>> = self.read().values().cloned().collect();
        entries.sort_by(|left, right| left.plugin_id().cmp(right.plugin_id()));
        entries
    }

    /// Returns the number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn set_enabled(
        &self,
        plugin_id: &str,
        enabled: bool,
    ) -> Result<Arc<RegistryEntry>, RegistryError> {
        let mut entries = self.write();
        let current = entries
            .get(plugin_id)
            .ok_or_else(|| RegistryError::NotFound {
                plugin_id: plugin_id.to_owned(),
            })?;
        if current.status() == RegistrationStatus::Rejected {
            return Err(RegistryError::SignatureRejected {
                plugin_id: plugin_id.to_owned(),
            });
        }
        if current.is_enabled() == enabled {
            return Ok(Arc::clone(current));
        }
        let updated = Arc::new(current.with_enabled(enabled));
        entries.insert(plugin_id.to_owned(), Arc::clone(&updated));
        drop(entries);

        debug!(target: REGISTRY_TARGET, plugin = plugin_id, enabled, "plugin state changed");
        Ok(updated)
    }

    // A poisoned lock still holds a consistent map: entries are swapped
    // whole, never mutated in place.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RegistryEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RegistryEntry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
