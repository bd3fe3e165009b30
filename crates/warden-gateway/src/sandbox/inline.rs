//! In-process isolates for tests.
//!
//! The handler runs on its own thread and only sees the serialized invoke
//! line, but it shares the host's address space and environment. A handler
//! that overruns its deadline is abandoned, not killed: the thread keeps
//! running until the handler returns. The router refuses this launcher
//! unless the configuration enables inline isolation under test mode.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{Isolate, IsolateError, IsolateLauncher, SANDBOX_TARGET};
use crate::manifest::PluginManifest;
use crate::worker::{self, PluginHandler};

/// Runs a handler on a dedicated thread per invocation.
#[derive(Clone)]
pub(crate) struct InlineLauncher {
    handler: Arc<dyn PluginHandler>,
}

impl InlineLauncher {
    /// Wraps `handler`.
    #[must_use]
    pub(crate) fn new(handler: impl PluginHandler + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl fmt::Debug for InlineLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineLauncher").finish_non_exhaustive()
    }
}

impl IsolateLauncher for InlineLauncher {
    fn launch(&self, manifest: &PluginManifest) -> Result<Box<dyn Isolate>, IsolateError> {
        let (request_tx, request_rx) = mpsc::channel::<String>();
        let (reply_tx, reply_rx) = mpsc::channel::<String>();
        let handler = Arc::clone(&self.handler);
        let plugin_id = manifest.plugin_id().to_owned();

        thread::Builder::new()
            .name(format!("warden-inline-{plugin_id}"))
            .spawn(move || {
                let Ok(line) = request_rx.recv() else {
                    return;
                };
                match worker::handle_line(handler.as_ref(), &line) {
                    Ok(reply) => drop(reply_tx.send(reply)),
                    Err(error) => debug!(
                        target: SANDBOX_TARGET,
                        plugin = %plugin_id,
                        %error,
                        "inline handler failed"
                    ),
                }
            })
            .map_err(|error| IsolateError::Launch {
                message: format!("failed to start inline isolate: {error}"),
            })?;

        Ok(Box::new(InlineIsolate {
            requests: Some(request_tx),
            replies: reply_rx,
        }))
    }

    fn is_isolated(&self) -> bool {
        false
    }
}

struct InlineIsolate {
    requests: Option<Sender<String>>,
    replies: Receiver<String>,
}

impl Isolate for InlineIsolate {
    fn send(&mut self, line: &str) -> Result<(), IsolateError> {
        let requests = self.requests.as_ref().ok_or(IsolateError::Closed)?;
        requests
            .send(line.to_owned())
            .map_err(|_| IsolateError::Closed)
    }

    fn receive(&mut self, timeout: Duration) -> Result<String, IsolateError> {
        self.replies.recv_timeout(timeout).map_err(|error| match error {
            RecvTimeoutError::Timeout => IsolateError::Elapsed,
            RecvTimeoutError::Disconnected => IsolateError::Closed,
        })
    }

    fn terminate(&mut self) -> Result<(), IsolateError> {
        self.requests = None;
        Ok(())
    }
}
