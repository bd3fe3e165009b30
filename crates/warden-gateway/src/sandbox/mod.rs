//! Sandboxed execution of one invocation.
//!
//! [`SandboxExecutor::execute`] launches one isolate per invocation through
//! an [`IsolateLauncher`], sends a single `invoke` message, waits at most the
//! effective timeout for a single `result` message, and always terminates the
//! isolate before returning. Every failure becomes a well-formed
//! [`PluginResponse`]; nothing escapes as an error.
//!
//! Two launchers ship with the crate. [`ProcessLauncher`] runs the manifest's
//! entrypoint as a separate OS process under [`warden_sandbox`] and is the
//! only launcher a production router accepts. The crate-private inline
//! launcher runs a handler on a thread in the host process; it is reachable
//! only through `Router::bind_inline`, which enforces the test-mode gate.

mod inline;
mod process;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::InvocationFault;
use crate::evidence;
use crate::manifest::PluginManifest;
use crate::protocol::{
    EvidenceHashes, HostMessage, IsolateMessage, PluginRequest, PluginResponse, PluginStatus,
};

pub(crate) use self::inline::InlineLauncher;
pub use self::process::{ENTRYPOINT_EXPORT_ENV, PLUGIN_ID_ENV, ProcessLauncher};

/// Tracing target for sandbox execution.
const SANDBOX_TARGET: &str = "warden_gateway::sandbox";

/// Errors raised by an isolate or its launcher.
#[derive(Debug, Clone, Error)]
pub enum IsolateError {
    /// The isolate could not be started.
    #[error("isolate could not be launched: {message}")]
    Launch {
        /// Description of the launch failure.
        message: String,
    },

    /// The channel closed before a message could be exchanged.
    #[error("isolate channel closed")]
    Closed,

    /// No message arrived before the deadline.
    #[error("isolate did not answer in time")]
    Elapsed,

    /// Reading from or writing to the isolate failed.
    #[error("isolate I/O failed: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The isolate could not be torn down.
    #[error("isolate could not be terminated: {message}")]
    Terminate {
        /// Description of the termination failure.
        message: String,
    },
}

/// One running execution unit.
pub trait Isolate: Send {
    /// Delivers one message line to the isolate.
    ///
    /// # Errors
    ///
    /// Returns an [`IsolateError`] when the channel is closed.
    fn send(&mut self, line: &str) -> Result<(), IsolateError>;

    /// Waits up to `timeout` for one message line from the isolate.
    ///
    /// # Errors
    ///
    /// Returns [`IsolateError::Elapsed`] when nothing arrives in time and
    /// [`IsolateError::Closed`] when the isolate went away without replying.
    fn receive(&mut self, timeout: Duration) -> Result<String, IsolateError>;

    /// Forcibly stops the isolate. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns [`IsolateError::Terminate`] when the isolate could not be
    /// stopped.
    fn terminate(&mut self) -> Result<(), IsolateError>;
}

/// Starts isolates for a plugin.
pub trait IsolateLauncher: Send + Sync {
    /// Starts one isolate bound to `manifest`'s entrypoint and limits.
    ///
    /// # Errors
    ///
    /// Returns [`IsolateError::Launch`] when no isolate could be started.
    fn launch(&self, manifest: &PluginManifest) -> Result<Box<dyn Isolate>, IsolateError>;

    /// Returns whether isolates share no memory or ambient environment with
    /// the host.
    fn is_isolated(&self) -> bool;
}

/// Returns `min(request timeout, manifest ceiling)`.
#[must_use]
pub fn effective_timeout_ms(request: &PluginRequest, manifest: &PluginManifest) -> u64 {
    request.policy().timeout_ms().min(manifest.limits().max_ms)
}

/// Runs single invocations inside isolates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxExecutor;

impl SandboxExecutor {
    /// Executes `request` against `manifest`'s plugin and always returns a
    /// response.
    ///
    /// The timer covers launch and exchange. On timeout the response carries
    /// `duration_ms` equal to the effective timeout.
    #[must_use]
    pub fn execute(
        &self,
        manifest: &PluginManifest,
        request: &PluginRequest,
        launcher: &dyn IsolateLauncher,
    ) -> PluginResponse {
        let plugin_id = manifest.plugin_id();
        let input_hash = evidence::content_hash(request.payload());
        let timeout_ms = effective_timeout_ms(request, manifest);
        let started = Instant::now();

        debug!(
            target: SANDBOX_TARGET,
            plugin = plugin_id,
            request_id = request.request_id(),
            timeout_ms,
            "launching isolate"
        );
        let outcome = run_isolated(manifest, request, launcher, timeout_ms, started);
        let elapsed_ms = elapsed_millis(started);

        match outcome {
            Ok(reply) => accept_reply(reply, request, plugin_id, input_hash, elapsed_ms),
            Err(fault) => {
                warn!(
                    target: SANDBOX_TARGET,
                    plugin = plugin_id,
                    request_id = request.request_id(),
                    kind = fault.kind(),
                    %fault,
                    "invocation failed"
                );
                let duration_ms = match fault {
                    InvocationFault::Timeout { timeout_ms: budget } => budget,
                    _ => elapsed_ms,
                };
                PluginResponse::stamped(
                    request.request_id(),
                    plugin_id,
                    fault.status(),
                    Value::Null,
                    EvidenceHashes {
                        input_hash,
                        output_hash: String::new(),
                    },
                    duration_ms,
                    fault.note(),
                )
            }
        }
    }
}

fn run_isolated(
    manifest: &PluginManifest,
    request: &PluginRequest,
    launcher: &dyn IsolateLauncher,
    timeout_ms: u64,
    started: Instant,
) -> Result<PluginResponse, InvocationFault> {
    let mut isolate = launcher
        .launch(manifest)
        .map_err(|error| isolate_fault(error, timeout_ms))?;
    let outcome = exchange(isolate.as_mut(), request, timeout_ms, started);
    if let Err(error) = isolate.terminate() {
        warn!(
            target: SANDBOX_TARGET,
            plugin = manifest.plugin_id(),
            %error,
            "isolate termination failed"
        );
    }
    outcome
}

fn exchange(
    isolate: &mut dyn Isolate,
    request: &PluginRequest,
    timeout_ms: u64,
    started: Instant,
) -> Result<PluginResponse, InvocationFault> {
    let message = HostMessage::Invoke {
        request: request.clone(),
    };
    let line = serde_json::to_string(&message).map_err(|error| InvocationFault::RuntimeFault {
        detail: error.to_string(),
    })?;
    isolate
        .send(&line)
        .map_err(|error| isolate_fault(error, timeout_ms))?;

    let remaining = Duration::from_millis(timeout_ms).saturating_sub(started.elapsed());
    let reply = isolate
        .receive(remaining)
        .map_err(|error| isolate_fault(error, timeout_ms))?;

    let IsolateMessage::Result { response } = serde_json::from_str(reply.trim()).map_err(
        |error| InvocationFault::ProtocolViolation {
            detail: error.to_string(),
        },
    )?;
    if response.status() == PluginStatus::Timeout {
        return Err(InvocationFault::ProtocolViolation {
            detail: "isolate reported a timeout status".to_owned(),
        });
    }
    Ok(response)
}

/// Rebuilds the handler's reply from gateway-computed fields.
///
/// Only an `ok` reply keeps its result and notes; other statuses get a
/// generic note.
fn accept_reply(
    reply: PluginResponse,
    request: &PluginRequest,
    plugin_id: &str,
    input_hash: String,
    elapsed_ms: u64,
) -> PluginResponse {
    let (status, handler_result, handler_notes) = reply.into_parts();
    let (result, notes) = match status {
        PluginStatus::Ok => (handler_result, handler_notes),
        PluginStatus::Rejected => (Value::Null, "plugin rejected the request".to_owned()),
        PluginStatus::Error | PluginStatus::Timeout => {
            (Value::Null, "plugin reported an error".to_owned())
        }
    };
    let output_hash = evidence::output_hash(&result);
    debug!(
        target: SANDBOX_TARGET,
        plugin = plugin_id,
        request_id = request.request_id(),
        status = status.as_str(),
        duration_ms = elapsed_ms,
        "isolate replied"
    );
    PluginResponse::stamped(
        request.request_id(),
        plugin_id,
        status,
        result,
        EvidenceHashes {
            input_hash,
            output_hash,
        },
        elapsed_ms,
        notes,
    )
}

fn isolate_fault(error: IsolateError, timeout_ms: u64) -> InvocationFault {
    match error {
        IsolateError::Elapsed => InvocationFault::Timeout { timeout_ms },
        other => InvocationFault::RuntimeFault {
            detail: other.to_string(),
        },
    }
}

pub(crate) fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests;
