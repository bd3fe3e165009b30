//! The gateway façade.
//!
//! [`Router::invoke`] is the single authorised path from the host to plugin
//! code. Each call walks the same sequence: registry lookup, request
//! validation, determinism policy, an `INVOKE` ledger entry, sandboxed
//! execution, response validation, and a terminal ledger entry whose kind
//! matches the final status. Refusals before the sandbox write a single
//! `REJECT` entry and never launch an isolate.

mod pipeline;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde_json::Value;
use tracing::{error, info, warn};
use warden_config::GatewayConfig;

use crate::error::{GatewayError, InvocationFault, PolicyViolation, SchemaStage};
use crate::evidence;
use crate::ledger::{Ledger, LedgerDraft, LedgerKind, ProofBundle, now_rfc3339};
use crate::manifest::{DeterminismMode, PluginManifest};
use crate::protocol::{EvidenceHashes, PluginRequest, PluginResponse};
use crate::registry::{PluginRegistry, RegistryEntry};
use crate::sandbox::{
    InlineLauncher, IsolateLauncher, ProcessLauncher, SandboxExecutor, elapsed_millis,
};
use crate::validator::{self, Validator, ValidatorPolicy};
use crate::worker::PluginHandler;

pub use self::pipeline::{PipelinePolicy, PipelineResponse, PipelineStep, PipelineStrategy};

/// Tracing target for routing decisions.
const ROUTER_TARGET: &str = "warden_gateway::router";

/// Run id recorded on registry lifecycle entries.
pub const LIFECYCLE_RUN_ID: &str = "lifecycle";

/// Routes invocations to sandboxed plugins.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use warden_config::GatewayConfig;
/// use warden_gateway::manifest::{Entrypoint, PluginManifest};
/// use warden_gateway::protocol::{PluginRequest, PluginResponse, PluginStatus, RequestPolicy};
/// use warden_gateway::worker::HandlerError;
/// use warden_gateway::Router;
///
/// let router = Router::from_config(GatewayConfig::for_tests())?;
/// let manifest = PluginManifest::new(
///     "acme.echo",
///     "Echo",
///     "1.0.0",
///     Entrypoint::new("/usr/libexec/warden/echo", "handle"),
/// )
/// .with_description("Echoes its payload");
/// router.register(manifest, "sig", true)?;
/// router.enable("acme.echo")?;
/// router.bind_inline("acme.echo", |request: PluginRequest| -> Result<PluginResponse, HandlerError> {
///     Ok(PluginResponse::ok(request.payload().clone()))
/// })?;
///
/// let request = PluginRequest::new("run-1", "req-1", json!({"text": "hi"}), RequestPolicy::new(1000));
/// let response = router.invoke("acme.echo", &request);
/// assert_eq!(response.status(), PluginStatus::Ok);
/// # Ok::<(), warden_gateway::GatewayError>(())
/// ```
pub struct Router {
    config: GatewayConfig,
    registry: Arc<PluginRegistry>,
    ledger: Arc<Ledger>,
    validator: Validator,
    executor: SandboxExecutor,
    bindings: RwLock<HashMap<String, Arc<dyn IsolateLauncher>>>,
}

impl Router {
    /// Creates a router over an existing registry and ledger.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the configuration is invalid,
    /// including inline isolation outside test mode.
    pub fn new(
        config: GatewayConfig,
        registry: Arc<PluginRegistry>,
        ledger: Arc<Ledger>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        let validator = Validator::new(ValidatorPolicy::from_config(&config));
        info!(
            target: ROUTER_TARGET,
            isolation = %config.isolation(),
            test_mode = config.test_mode(),
            "router ready"
        );
        Ok(Self {
            config,
            registry,
            ledger,
            validator,
            executor: SandboxExecutor,
            bindings: RwLock::new(HashMap::new()),
        })
    }

    /// Creates a router with a fresh registry and a ledger opened from
    /// `ledger_path`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for an invalid configuration or
    /// [`GatewayError::Ledger`] when the ledger sink cannot be opened.
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let registry = PluginRegistry::new(Validator::new(ValidatorPolicy::from_config(&config)));
        let ledger = Ledger::from_config(&config)?;
        Self::new(config, Arc::new(registry), Arc::new(ledger))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Returns the audit ledger.
    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Registers a manifest and records a `REGISTER` entry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Registry`] when the registry refuses the
    /// manifest, or [`GatewayError::Ledger`] when the entry cannot be
    /// recorded.
    pub fn register(
        &self,
        manifest: PluginManifest,
        signature: impl Into<String>,
        signature_valid: bool,
    ) -> Result<Arc<RegistryEntry>, GatewayError> {
        let entry = self
            .registry
            .register(manifest, signature, signature_valid, now_rfc3339())?;
        self.ledger.append(
            LedgerDraft::new(LedgerKind::Register, LIFECYCLE_RUN_ID, entry.plugin_id())
                .meta("status", entry.status().as_str())
                .meta("manifest_hash", entry.manifest_hash()),
        )?;
        Ok(entry)
    }

    /// Enables a plugin and records an `ENABLE` entry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Registry`] for unknown or rejected plugins, or
    /// [`GatewayError::Ledger`] when the entry cannot be recorded.
    pub fn enable(&self, plugin_id: &str) -> Result<(), GatewayError> {
        self.registry.enable(plugin_id)?;
        self.ledger.append(LedgerDraft::new(
            LedgerKind::Enable,
            LIFECYCLE_RUN_ID,
            plugin_id,
        ))?;
        Ok(())
    }

    /// Disables a plugin and records a `DISABLE` entry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Registry`] for unknown or rejected plugins, or
    /// [`GatewayError::Ledger`] when the entry cannot be recorded.
    pub fn disable(&self, plugin_id: &str) -> Result<(), GatewayError> {
        self.registry.disable(plugin_id)?;
        self.ledger.append(LedgerDraft::new(
            LedgerKind::Disable,
            LIFECYCLE_RUN_ID,
            plugin_id,
        ))?;
        Ok(())
    }

    /// Binds the launcher that starts isolates for `plugin_id`, replacing any
    /// earlier binding.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::IsolationRequired`] when `launcher` does not
    /// isolate and the configuration is not inline under test mode.
    pub fn bind(
        &self,
        plugin_id: &str,
        launcher: Arc<dyn IsolateLauncher>,
    ) -> Result<(), GatewayError> {
        let inline_permitted = !self.config.isolation().is_isolated() && self.config.test_mode();
        if !launcher.is_isolated() && !inline_permitted {
            return Err(GatewayError::IsolationRequired {
                plugin_id: plugin_id.to_owned(),
            });
        }
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(plugin_id.to_owned(), launcher);
        Ok(())
    }

    /// Binds `plugin_id` to the sandboxed process launcher.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches [`Router::bind`].
    pub fn bind_process(&self, plugin_id: &str) -> Result<(), GatewayError> {
        self.bind(plugin_id, Arc::new(ProcessLauncher))
    }

    /// Binds `plugin_id` to an in-process handler. Test mode only.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::IsolationRequired`] outside inline test mode.
    pub fn bind_inline(
        &self,
        plugin_id: &str,
        handler: impl PluginHandler + 'static,
    ) -> Result<(), GatewayError> {
        self.bind(plugin_id, Arc::new(InlineLauncher::new(handler)))
    }

    /// Invokes one plugin. Always returns a response; failures are reported
    /// through its status and notes.
    #[must_use]
    pub fn invoke(&self, plugin_id: &str, request: &PluginRequest) -> PluginResponse {
        let started = Instant::now();
        let (entry, launcher) = match self.resolve(plugin_id) {
            Ok(resolved) => resolved,
            Err(violation) => return self.refuse(plugin_id, request, violation.into(), started),
        };
        let manifest = entry.manifest();

        let mut issues = self.validator.validate_request(request);
        issues.extend(self.validator.validate_request_limits(manifest, request));
        if validator::has_errors(&issues) {
            let fault = InvocationFault::SchemaInvalid {
                stage: SchemaStage::Request,
                fields: validator::error_fields(&issues),
            };
            return self.refuse(plugin_id, request, fault, started);
        }

        if request.policy().requires_determinism()
            && manifest.determinism().mode() != DeterminismMode::Deterministic
        {
            return self.refuse(
                plugin_id,
                request,
                PolicyViolation::NonDeterministic.into(),
                started,
            );
        }

        let input_hash = evidence::content_hash(request.payload());
        let invoke = LedgerDraft::new(LedgerKind::Invoke, request.run_id(), plugin_id)
            .request(request.request_id())
            .hashes(input_hash, "")
            .meta("timeout_ms", request.policy().timeout_ms().to_string());
        if let Err(source) = self.ledger.append(invoke) {
            error!(target: ROUTER_TARGET, plugin = plugin_id, %source, "INVOKE entry not recorded");
            return self.refuse(
                plugin_id,
                request,
                PolicyViolation::AuditUnavailable.into(),
                started,
            );
        }

        let executed = self.executor.execute(manifest, request, launcher.as_ref());
        let issues = self.validator.validate_response(&executed, manifest, request);
        let response = if validator::has_errors(&issues) {
            let fault = InvocationFault::SchemaInvalid {
                stage: SchemaStage::Response,
                fields: validator::error_fields(&issues),
            };
            warn!(target: ROUTER_TARGET, plugin = plugin_id, %fault, "response downgraded");
            executed.into_rejected(fault.note())
        } else {
            executed
        };

        self.close(plugin_id, request, response)
    }

    /// Collects the ledger evidence for `run_id` together with the manifest
    /// hash of every plugin the run touched.
    #[must_use]
    pub fn export_proof(&self, run_id: &str) -> ProofBundle {
        let plugin_ids: BTreeSet<String> = self
            .ledger
            .by_run(run_id)
            .into_iter()
            .map(|entry| entry.plugin_id)
            .collect();
        let digests: BTreeMap<String, String> = plugin_ids
            .into_iter()
            .filter_map(|plugin_id| {
                self.registry
                    .get(&plugin_id)
                    .ok()
                    .map(|entry| (plugin_id, entry.manifest_hash().to_owned()))
            })
            .collect();
        self.ledger.export_proof(run_id, digests)
    }

    fn resolve(
        &self,
        plugin_id: &str,
    ) -> Result<(Arc<RegistryEntry>, Arc<dyn IsolateLauncher>), PolicyViolation> {
        let entry = self
            .registry
            .get(plugin_id)
            .map_err(|_| PolicyViolation::UnknownPlugin)?;
        if !entry.is_enabled() {
            return Err(PolicyViolation::PluginDisabled);
        }
        let launcher = self
            .bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plugin_id)
            .cloned()
            .ok_or(PolicyViolation::HandlerUnbound)?;
        Ok((entry, launcher))
    }

    /// Refuses before the sandbox: one `REJECT` entry, no `INVOKE`.
    fn refuse(
        &self,
        plugin_id: &str,
        request: &PluginRequest,
        fault: InvocationFault,
        started: Instant,
    ) -> PluginResponse {
        let input_hash = evidence::content_hash(request.payload());
        let draft = LedgerDraft::new(LedgerKind::Reject, request.run_id(), plugin_id)
            .request(request.request_id())
            .hashes(input_hash.clone(), "")
            .meta("reason", fault.kind())
            .meta("status", fault.status().as_str());
        if let Err(source) = self.ledger.append(draft) {
            error!(target: ROUTER_TARGET, plugin = plugin_id, %source, "REJECT entry not recorded");
        }
        info!(
            target: ROUTER_TARGET,
            plugin = plugin_id,
            run_id = request.run_id(),
            request_id = request.request_id(),
            status = fault.status().as_str(),
            %fault,
            "invocation refused"
        );
        PluginResponse::stamped(
            request.request_id(),
            plugin_id,
            fault.status(),
            Value::Null,
            EvidenceHashes {
                input_hash,
                output_hash: String::new(),
            },
            elapsed_millis(started),
            fault.note(),
        )
    }

    /// Records the terminal entry. A response that cannot be audited is not
    /// released.
    fn close(
        &self,
        plugin_id: &str,
        request: &PluginRequest,
        response: PluginResponse,
    ) -> PluginResponse {
        let hashes = response.evidence_hashes();
        let draft = LedgerDraft::new(
            LedgerKind::for_status(response.status()),
            request.run_id(),
            plugin_id,
        )
        .request(request.request_id())
        .hashes(hashes.input_hash.clone(), hashes.output_hash.clone())
        .meta("status", response.status().as_str())
        .meta("duration_ms", response.duration_ms().to_string());

        let released = match self.ledger.append(draft) {
            Ok(_) => response,
            Err(source) => {
                error!(target: ROUTER_TARGET, plugin = plugin_id, %source, "terminal entry not recorded");
                response.into_rejected(PolicyViolation::AuditUnavailable.note().to_owned())
            }
        };
        info!(
            target: ROUTER_TARGET,
            plugin = plugin_id,
            run_id = request.run_id(),
            request_id = request.request_id(),
            status = released.status().as_str(),
            duration_ms = released.duration_ms(),
            "invocation complete"
        );
        released
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}
