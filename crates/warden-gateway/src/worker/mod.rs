//! Plugin-side half of the wire protocol.
//!
//! A worker reads exactly one [`HostMessage::Invoke`] line, hands the request
//! to a [`PluginHandler`], and writes exactly one [`IsolateMessage::Result`]
//! line. When the handler fails nothing is written: the gateway sees the
//! channel close without a result and reports `error`, so handler failure
//! text never travels back to the caller.

use std::io::{BufRead, Write};

use thiserror::Error;

use crate::protocol::{HostMessage, IsolateMessage, PluginRequest, PluginResponse};

/// Failure reported by a plugin handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler failure.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A plugin's business logic: one request in, one response out.
pub trait PluginHandler: Send + Sync {
    /// Handles one request.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the handler cannot produce a response.
    fn handle(&self, request: PluginRequest) -> Result<PluginResponse, HandlerError>;
}

impl<F> PluginHandler for F
where
    F: Fn(PluginRequest) -> Result<PluginResponse, HandlerError> + Send + Sync,
{
    fn handle(&self, request: PluginRequest) -> Result<PluginResponse, HandlerError> {
        self(request)
    }
}

/// Errors raised while serving one invocation.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The invoke line could not be read.
    #[error("failed to read invoke message: {source}")]
    Read {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The host closed the channel without sending a request.
    #[error("no invoke message received")]
    NoRequest,

    /// The line was not a valid invoke message.
    #[error("malformed invoke message: {source}")]
    Malformed {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The handler failed.
    #[error("handler failed: {source}")]
    Handler {
        /// Handler failure.
        #[from]
        source: HandlerError,
    },

    /// The result message could not be serialized.
    #[error("failed to serialise result message: {source}")]
    Serialize {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The result line could not be written.
    #[error("failed to write result message: {source}")]
    Write {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Decodes one invoke line, runs the handler, and encodes the result line
/// (without the trailing newline).
///
/// # Errors
///
/// Returns [`WorkerError::Malformed`], [`WorkerError::Handler`], or
/// [`WorkerError::Serialize`].
pub fn handle_line<H>(handler: &H, line: &str) -> Result<String, WorkerError>
where
    H: PluginHandler + ?Sized,
{
    let HostMessage::Invoke { request } = serde_json::from_str(line.trim())
        .map_err(|source| WorkerError::Malformed { source })?;
    let response = handler.handle(request)?;
    serde_json::to_string(&IsolateMessage::Result { response })
        .map_err(|source| WorkerError::Serialize { source })
}

/// Serves exactly one invocation over `reader` and `writer`.
///
/// # Errors
///
/// Returns a [`WorkerError`] when no valid request arrives, the handler
/// fails, or the result cannot be written. Nothing is written on error.
pub fn serve<H>(
    handler: &H,
    reader: &mut impl BufRead,
    writer: &mut impl Write,
) -> Result<(), WorkerError>
where
    H: PluginHandler + ?Sized,
{
    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .map_err(|source| WorkerError::Read { source })?;
    if bytes_read == 0 {
        return Err(WorkerError::NoRequest);
    }

    let reply = handle_line(handler, &line)?;
    writer
        .write_all(reply.as_bytes())
        .map_err(|source| WorkerError::Write { source })?;
    writer
        .write_all(b"\n")
        .map_err(|source| WorkerError::Write { source })?;
    writer
        .flush()
        .map_err(|source| WorkerError::Write { source })
}
