//! Sandboxed plugin gateway.
//!
//! `warden-gateway` lets a host run third-party plugins without trusting
//! them. Plugins declare themselves through a [`PluginManifest`], are
//! admitted by the [`PluginRegistry`] only after validation, and are invoked
//! exclusively through the [`Router`]. Every invocation runs in a fresh
//! isolate under a hard timeout, exchanges exactly one request and one
//! response as JSON lines, and leaves a hash-chained trail in the
//! [`Ledger`].
//!
//! # Architecture
//!
//! The [`Router`] is the only path from host to plugin code. It resolves the
//! plugin, validates the request with the [`Validator`], checks determinism
//! policy, records an `INVOKE` entry, hands the request to the
//! [`sandbox::SandboxExecutor`], validates the response, and records a
//! terminal entry. Failures never surface as `Err`: they are folded into a
//! [`PluginResponse`] whose [`PluginStatus`] is `error`, `rejected`, or
//! `timeout`.
//!
//! In production each invocation runs the manifest's entrypoint as a
//! separate process under [`warden_sandbox`]. Plugin binaries implement
//! their half of the protocol with [`worker::serve`].
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use warden_config::GatewayConfig;
//! use warden_gateway::manifest::{Entrypoint, PluginManifest};
//! use warden_gateway::protocol::{PluginRequest, RequestPolicy};
//! use warden_gateway::Router;
//!
//! let router = Router::from_config(GatewayConfig::default())?;
//! let manifest = PluginManifest::new(
//!     "warden.echo",
//!     "Echo",
//!     "0.1.0",
//!     Entrypoint::new("/usr/libexec/warden/warden-plugin-echo", "handle"),
//! );
//! router.register(manifest, "signature", true)?;
//! router.enable("warden.echo")?;
//! router.bind_process("warden.echo")?;
//!
//! let request = PluginRequest::new("run-1", "req-1", json!({"text": "hi"}), RequestPolicy::new(1000));
//! let response = router.invoke("warden.echo", &request);
//! assert_eq!(response.request_id(), "req-1");
//! # Ok::<(), warden_gateway::GatewayError>(())
//! ```

pub mod error;
pub mod evidence;
pub mod ledger;
pub mod manifest;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod sandbox;
pub mod telemetry;
pub mod validator;
pub mod worker;

#[cfg(test)]
mod tests;

pub use self::error::{GatewayError, InvocationFault, PolicyViolation, RegistryError};
pub use self::ledger::{Ledger, LedgerEntry, LedgerError, LedgerKind, ProofBundle};
pub use self::manifest::PluginManifest;
pub use self::protocol::{PluginRequest, PluginResponse, PluginStatus, RequestPolicy};
pub use self::registry::{PluginRegistry, RegistryEntry};
pub use self::router::{PipelinePolicy, PipelineResponse, PipelineStep, PipelineStrategy, Router};
pub use self::validator::{ValidationIssue, Validator};
