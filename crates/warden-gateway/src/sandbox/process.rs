//! OS-process isolates built on `warden-sandbox`.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{ChildStderr, ChildStdin, ChildStdout, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use warden_sandbox::{Sandbox, SandboxChild, SandboxCommand, SandboxProfile};

use super::{Isolate, IsolateError, IsolateLauncher, SANDBOX_TARGET};
use crate::manifest::PluginManifest;

/// Environment variable naming the handler export the worker should run.
pub const ENTRYPOINT_EXPORT_ENV: &str = "WARDEN_ENTRYPOINT_EXPORT";
/// Environment variable carrying the plugin id.
pub const PLUGIN_ID_ENV: &str = "WARDEN_PLUGIN_ID";

/// Slack above `limits.max_bytes` allowed for the result envelope.
const ENVELOPE_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Launches each invocation as a fresh sandboxed process.
///
/// The child runs the manifest's entrypoint module with a cleared
/// environment, the memory ceiling from `limits.max_memory_mb`, and its own
/// process group so termination also reaches anything it forked.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl IsolateLauncher for ProcessLauncher {
    fn launch(&self, manifest: &PluginManifest) -> Result<Box<dyn Isolate>, IsolateError> {
        let plugin_id = manifest.plugin_id();
        let entrypoint = manifest.entrypoint();

        let mut command = SandboxCommand::new(entrypoint.module());
        command.args(entrypoint.args());
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        debug!(
            target: SANDBOX_TARGET,
            plugin = plugin_id,
            module = %entrypoint.module().display(),
            "spawning plugin process"
        );
        let mut child = Sandbox::new(build_profile(manifest))
            .spawn(command)
            .map_err(|error| IsolateError::Launch {
                message: error.to_string(),
            })?;

        let stdin = child.take_stdin().ok_or_else(|| IsolateError::Launch {
            message: String::from("failed to capture stdin"),
        })?;
        let stdout = child.take_stdout().ok_or_else(|| IsolateError::Launch {
            message: String::from("failed to capture stdout"),
        })?;
        let reply_limit = manifest
            .limits()
            .max_bytes
            .saturating_add(ENVELOPE_OVERHEAD_BYTES);
        let replies = spawn_reply_reader(plugin_id, stdout, reply_limit)?;
        drain_stderr(plugin_id, child.take_stderr());

        Ok(Box::new(ProcessIsolate {
            plugin_id: plugin_id.to_owned(),
            child,
            stdin: Some(stdin),
            replies,
        }))
    }

    fn is_isolated(&self) -> bool {
        true
    }
}

/// Builds the sandbox profile for a plugin.
fn build_profile(manifest: &PluginManifest) -> SandboxProfile {
    let entrypoint = manifest.entrypoint();
    SandboxProfile::new()
        .allow_executable(entrypoint.module())
        .set_environment_variable(ENTRYPOINT_EXPORT_ENV, entrypoint.export())
        .set_environment_variable(PLUGIN_ID_ENV, manifest.plugin_id())
        .limit_memory_bytes(manifest.limits().max_memory_bytes())
}

/// Reads at most one line from stdout on a helper thread so the executor
/// can wait on it with a deadline.
fn spawn_reply_reader(
    plugin_id: &str,
    stdout: ChildStdout,
    limit: u64,
) -> Result<Receiver<std::io::Result<String>>, IsolateError> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name(format!("warden-stdout-{plugin_id}"))
        .spawn(move || {
            let mut reader = BufReader::new(stdout.take(limit));
            let mut line = String::new();
            let outcome = reader.read_line(&mut line).map(|_| line);
            drop(sender.send(outcome));
        })
        .map_err(|error| IsolateError::Launch {
            message: format!("failed to start stdout reader: {error}"),
        })?;
    Ok(receiver)
}

/// Drains stderr to avoid blocking the child on a full pipe buffer.
fn drain_stderr(plugin_id: &str, stderr: Option<ChildStderr>) {
    let Some(reader) = stderr else {
        return;
    };
    let plugin = plugin_id.to_owned();
    let spawned = thread::Builder::new()
        .name(format!("warden-stderr-{plugin_id}"))
        .spawn(move || {
            let mut buffer = String::new();
            if BufReader::new(reader).read_to_string(&mut buffer).is_ok() && !buffer.is_empty() {
                debug!(
                    target: SANDBOX_TARGET,
                    plugin = %plugin,
                    stderr = %buffer.trim(),
                    "plugin stderr output"
                );
            }
        });
    if let Err(error) = spawned {
        warn!(target: SANDBOX_TARGET, plugin = plugin_id, %error, "stderr drain not started");
    }
}

struct ProcessIsolate {
    plugin_id: String,
    child: SandboxChild,
    stdin: Option<ChildStdin>,
    replies: Receiver<std::io::Result<String>>,
}

impl Isolate for ProcessIsolate {
    /// Writes the line on a helper thread and closes stdin afterwards, so a
    /// plugin that never reads cannot stall the caller past its deadline.
    fn send(&mut self, line: &str) -> Result<(), IsolateError> {
        let mut stdin = self.stdin.take().ok_or(IsolateError::Closed)?;
        let mut message = Vec::with_capacity(line.len() + 1);
        message.extend_from_slice(line.as_bytes());
        message.push(b'\n');
        let plugin = self.plugin_id.clone();
        thread::Builder::new()
            .name(format!("warden-stdin-{}", self.plugin_id))
            .spawn(move || {
                if let Err(error) = stdin.write_all(&message).and_then(|()| stdin.flush()) {
                    debug!(target: SANDBOX_TARGET, plugin = %plugin, %error, "stdin write failed");
                }
            })
            .map(drop)
            .map_err(|source| IsolateError::Io {
                source: Arc::new(source),
            })
    }

    fn receive(&mut self, timeout: Duration) -> Result<String, IsolateError> {
        match self.replies.recv_timeout(timeout) {
            Ok(Ok(line)) if line.is_empty() => Err(IsolateError::Closed),
            Ok(Ok(line)) => Ok(line),
            Ok(Err(source)) => Err(IsolateError::Io {
                source: Arc::new(source),
            }),
            Err(RecvTimeoutError::Timeout) => Err(IsolateError::Elapsed),
            Err(RecvTimeoutError::Disconnected) => Err(IsolateError::Closed),
        }
    }

    fn terminate(&mut self) -> Result<(), IsolateError> {
        let status = self
            .child
            .terminate()
            .map_err(|error| IsolateError::Terminate {
                message: error.to_string(),
            })?;
        debug!(
            target: SANDBOX_TARGET,
            plugin = %self.plugin_id,
            pid = self.child.id(),
            ?status,
            "plugin process terminated"
        );
        Ok(())
    }
}
