//! Domain errors raised by the sandbox wrapper.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while preparing or launching a sandboxed process.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The supplied program path was not absolute.
    #[error("sandboxed commands require absolute program paths, got {0}")]
    ProgramNotAbsolute(PathBuf),

    /// The program was not whitelisted in the profile.
    #[error("executable {program} is not authorised by the sandbox profile")]
    ExecutableNotAuthorised { program: PathBuf },

    /// The supplied path does not exist and therefore cannot be whitelisted.
    #[error("path {path} does not exist on the host filesystem")]
    MissingPath { path: PathBuf },

    /// Canonicalisation of a path failed.
    #[error("failed to canonicalise {path}: {source}")]
    CanonicalisationFailed { path: PathBuf, source: io::Error },

    /// The operating system refused to start the process.
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: PathBuf, source: io::Error },

    /// Terminating the process group failed.
    #[error("failed to terminate sandboxed process {pid}: {source}")]
    Terminate { pid: u32, source: io::Error },
}
