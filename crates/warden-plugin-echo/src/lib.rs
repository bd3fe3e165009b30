//! Echo reference plugin.
//!
//! Reads one `invoke` message from stdin and answers with one `result`
//! message whose result is the request payload, unchanged. It is the smallest
//! worker that satisfies the gateway protocol and is used to exercise the
//! process isolation path end to end.

#[cfg(test)]
mod tests;

use std::io::{BufRead, Write};

use serde_json::Value;
use warden_gateway::protocol::{PluginRequest, PluginResponse};
use warden_gateway::worker::{self, HandlerError, WorkerError};

/// Answers `request` with its own payload.
///
/// # Errors
///
/// Returns a [`HandlerError`] when the payload is `null`, since an `ok`
/// response must carry a result.
pub fn echo(request: PluginRequest) -> Result<PluginResponse, HandlerError> {
    match request.payload() {
        Value::Null => Err(HandlerError::new("nothing to echo")),
        payload => Ok(PluginResponse::ok(payload.clone())),
    }
}

/// Serves one invocation over the given streams.
///
/// # Errors
///
/// Returns a [`WorkerError`] when the request is missing or malformed, or the
/// reply cannot be written.
pub fn run(reader: &mut impl BufRead, writer: &mut impl Write) -> Result<(), WorkerError> {
    worker::serve(&echo, reader, writer)
}
