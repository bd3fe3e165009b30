//! Process isolation for Warden plugin invocations.
//!
//! The `warden-sandbox` crate launches untrusted plugin executables with
//! policy defaults aligned to the gateway's zero-ambient-authority design.
//! Callers describe what a subprocess is permitted to do using a
//! [`SandboxProfile`], then launch that subprocess through a [`Sandbox`].
//!
//! Defaults are restrictive:
//! - Environment variables are stripped unless whitelisted or injected by the
//!   host.
//! - Executables must be whitelisted and provided as absolute paths.
//! - Address-space, CPU and descriptor ceilings are applied with `setrlimit`
//!   before the plugin image is executed.
//! - Every child leads its own process group so termination also reaches
//!   anything the plugin forked.
//!
//! ```rust,no_run
//! use std::process::Stdio;
//!
//! use warden_sandbox::{Sandbox, SandboxCommand, SandboxProfile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let profile = SandboxProfile::new()
//!     .allow_executable("/bin/echo")
//!     .limit_memory_bytes(128 * 1024 * 1024);
//!
//! let mut command = SandboxCommand::new("/bin/echo");
//! command.arg("hello from the cage").stdout(Stdio::piped());
//!
//! let sandbox = Sandbox::new(profile);
//! let mut child = sandbox.spawn(command)?;
//! let status = child.terminate()?;
//! # let _ = status;
//! # Ok(()) }
//! ```

mod error;
mod limits;
mod profile;
mod sandbox;

pub use error::SandboxError;
pub use profile::{EnvironmentPolicy, ResourceLimits, SandboxProfile};
pub use sandbox::{Sandbox, SandboxChild, SandboxCommand};

#[cfg(test)]
mod tests;
