//! Process launching under a [`SandboxProfile`].

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use tracing::debug;

use crate::error::SandboxError;
use crate::profile::{EnvironmentPolicy, SandboxProfile};

/// Tracing target for sandbox operations.
const SANDBOX_TARGET: &str = "warden_sandbox";

/// Builder for sandboxed commands.
pub type SandboxCommand = Command;

/// Launches commands inside a restrictive sandbox.
#[derive(Debug)]
pub struct Sandbox {
    profile: SandboxProfile,
}

impl Sandbox {
    /// Creates a sandbox with the supplied profile.
    #[must_use]
    pub const fn new(profile: SandboxProfile) -> Self {
        Self { profile }
    }

    /// Returns the profile this sandbox enforces.
    #[must_use]
    pub const fn profile(&self) -> &SandboxProfile {
        &self.profile
    }

    /// Spawns the provided command inside the configured sandbox.
    ///
    /// The command's program path must be absolute and whitelisted on the
    /// profile. The environment is rebuilt from the profile, resource limits
    /// are applied before `exec`, and the child leads a fresh process group.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] when the program is not authorised or the
    /// operating system refuses to start it.
    pub fn spawn(&self, mut command: SandboxCommand) -> Result<SandboxChild, SandboxError> {
        let program = canonical_program(Path::new(command.get_program()))?;
        self.ensure_program_whitelisted(&program)?;

        self.apply_environment(&mut command);
        self.apply_process_controls(&mut command);

        let child = command.spawn().map_err(|source| SandboxError::Spawn {
            program: program.clone(),
            source,
        })?;
        debug!(
            target: SANDBOX_TARGET,
            pid = child.id(),
            program = %program.display(),
            "spawned sandboxed process"
        );
        Ok(SandboxChild { child, reaped: None })
    }

    fn ensure_program_whitelisted(&self, program: &Path) -> Result<(), SandboxError> {
        let authorised = canonicalised_set(self.profile.executable_paths())?;
        if authorised.contains(program) {
            return Ok(());
        }
        Err(SandboxError::ExecutableNotAuthorised {
            program: program.to_path_buf(),
        })
    }

    fn apply_environment(&self, command: &mut SandboxCommand) {
        match self.profile.environment_policy() {
            EnvironmentPolicy::Isolated => {
                command.env_clear();
            }
            EnvironmentPolicy::AllowList(keys) => {
                command.env_clear();
                for key in keys {
                    if let Some(value) = env::var_os(key) {
                        command.env(key, value);
                    }
                }
            }
            EnvironmentPolicy::InheritAll => {}
        }
        for (key, value) in self.profile.injected_environment() {
            command.env(key, value);
        }
    }

    #[cfg(unix)]
    fn apply_process_controls(&self, command: &mut SandboxCommand) {
        let limits = self.profile.limits();
        command.process_group(0);
        // SAFETY: the hook only calls async-signal-safe `getrlimit`/`setrlimit`.
        unsafe {
            command.pre_exec(move || crate::limits::apply(limits));
        }
    }

    #[cfg(not(unix))]
    fn apply_process_controls(&self, _command: &mut SandboxCommand) {}
}

/// Handle to a running sandboxed process.
///
/// The child leads its own process group; [`SandboxChild::terminate`] kills
/// the whole group and reaps the leader.
#[derive(Debug)]
pub struct SandboxChild {
    child: Child,
    reaped: Option<ExitStatus>,
}

impl SandboxChild {
    /// Returns the operating system process identifier.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Takes ownership of the child's stdin pipe, if one was requested.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Takes ownership of the child's stdout pipe, if one was requested.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Takes ownership of the child's stderr pipe, if one was requested.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Polls the child for exit without blocking.
    ///
    /// # Errors
    ///
    /// Propagates the underlying `waitpid` failure.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.reaped {
            return Ok(Some(status));
        }
        let status = self.child.try_wait()?;
        self.reaped = status;
        Ok(status)
    }

    /// Kills the child's process group and waits for the leader to exit.
    ///
    /// Calling this more than once returns the status recorded the first
    /// time.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Terminate`] when the process cannot be killed
    /// or reaped.
    pub fn terminate(&mut self) -> Result<ExitStatus, SandboxError> {
        if let Some(status) = self.reaped {
            return Ok(status);
        }
        let pid = self.child.id();
        kill_group(pid);
        if let Err(source) = self.child.kill() {
            // InvalidInput means the child already exited and only needs reaping.
            if source.kind() != io::ErrorKind::InvalidInput {
                return Err(SandboxError::Terminate { pid, source });
            }
        }
        let status = self
            .child
            .wait()
            .map_err(|source| SandboxError::Terminate { pid, source })?;
        debug!(target: SANDBOX_TARGET, pid, ?status, "sandboxed process terminated");
        self.reaped = Some(status);
        Ok(status)
    }
}

impl Drop for SandboxChild {
    fn drop(&mut self) {
        drop(self.terminate());
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: signalling a process group has no memory-safety preconditions.
    // Failure (ESRCH) means the group is already gone.
    let _ = unsafe { libc::kill(-pgid, libc::SIGKILL) };
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn canonical_program(program: &Path) -> Result<PathBuf, SandboxError> {
    if !program.is_absolute() {
        return Err(SandboxError::ProgramNotAbsolute(program.to_path_buf()));
    }

    canonicalise(program)
}

pub(crate) fn canonicalised_set(paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>, SandboxError> {
    let mut set = BTreeSet::new();
    for path in paths {
        let canonical = canonicalise(path)?;
        let _ = set.insert(canonical);
    }
    Ok(set)
}

fn canonicalise(path: &Path) -> Result<PathBuf, SandboxError> {
    if !path.exists() {
        return Err(SandboxError::MissingPath {
            path: path.to_path_buf(),
        });
    }

    fs::canonicalize(path).map_err(|source| SandboxError::CanonicalisationFailed {
        path: path.to_path_buf(),
        source,
    })
}
