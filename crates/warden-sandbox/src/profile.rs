//! Sandbox policy definition and builder helpers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Environment inheritance strategy applied to sandboxed processes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvironmentPolicy {
    /// Remove all environment variables before launching the child.
    #[default]
    Isolated,
    /// Allow only the named environment variables to be inherited.
    AllowList(BTreeSet<String>),
    /// Inherit the full environment unchanged.
    InheritAll,
}

/// Resource ceilings applied to the child before it executes.
///
/// A `None` ceiling leaves the inherited limit untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    /// Maximum address space in bytes (`RLIMIT_AS`).
    pub memory_bytes: Option<u64>,
    /// Maximum CPU time in seconds (`RLIMIT_CPU`).
    pub cpu_seconds: Option<u64>,
    /// Maximum number of open file descriptors (`RLIMIT_NOFILE`).
    pub open_files: Option<u64>,
}

/// Declarative description of what a sandboxed process may do.
///
/// The profile defaults to a restrictive configuration: the environment is
/// cleared, no executables are authorised, and the child is placed in its own
/// process group so it can be torn down together with anything it forks.
/// Callers must explicitly list the executables a sandboxed process requires.
#[derive(Debug, Clone, Default)]
pub struct SandboxProfile {
    executable_paths: Vec<PathBuf>,
    environment: EnvironmentPolicy,
    injected: BTreeMap<String, String>,
    limits: ResourceLimits,
}

impl SandboxProfile {
    /// Creates a profile that authorises nothing and clears the environment.
    ///
    /// ```
    /// use warden_sandbox::SandboxProfile;
    ///
    /// let profile = SandboxProfile::new()
    ///     .allow_executable("/bin/sh")
    ///     .limit_memory_bytes(64 * 1024 * 1024);
    /// assert_eq!(profile.limits().memory_bytes, Some(64 * 1024 * 1024));
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants execute access to the provided path.
    #[must_use]
    pub fn allow_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_paths.push(path.into());
        self
    }

    /// Whitelists an environment variable for inheritance.
    ///
    /// When the policy is already [`EnvironmentPolicy::InheritAll`] this is a
    /// no-op because the full environment is already permitted.
    #[must_use]
    pub fn allow_environment_variable(mut self, key: impl Into<String>) -> Self {
        self.environment = self.environment.clone().with_allowed(key.into());
        self
    }

    /// Inherit all environment variables from the parent process.
    #[must_use]
    pub fn allow_full_environment(mut self) -> Self {
        self.environment = EnvironmentPolicy::InheritAll;
        self
    }

    /// Sets a variable in the child's environment regardless of policy.
    ///
    /// The value is supplied by the host, so it never leaks ambient state
    /// from the parent environment.
    #[must_use]
    pub fn set_environment_variable(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let _ = self.injected.insert(key.into(), value.into());
        self
    }

    /// Caps the child's address space.
    #[must_use]
    pub const fn limit_memory_bytes(mut self, bytes: u64) -> Self {
        self.limits.memory_bytes = Some(bytes);
        self
    }

    /// Caps the child's CPU time.
    #[must_use]
    pub const fn limit_cpu_seconds(mut self, seconds: u64) -> Self {
        self.limits.cpu_seconds = Some(seconds);
        self
    }

    /// Caps the number of file descriptors the child may hold open.
    #[must_use]
    pub const fn limit_open_files(mut self, count: u64) -> Self {
        self.limits.open_files = Some(count);
        self
    }

    /// Returns the executables the profile authorises.
    #[must_use]
    pub fn executable_paths(&self) -> &[PathBuf] {
        &self.executable_paths
    }

    /// Returns the configured environment policy.
    #[must_use]
    pub const fn environment_policy(&self) -> &EnvironmentPolicy {
        &self.environment
    }

    /// Returns variables injected by the host.
    #[must_use]
    pub const fn injected_environment(&self) -> &BTreeMap<String, String> {
        &self.injected
    }

    /// Returns the resource ceilings.
    #[must_use]
    pub const fn limits(&self) -> ResourceLimits {
        self.limits
    }
}

impl EnvironmentPolicy {
    pub(crate) fn with_allowed(self, key: String) -> Self {
        match self {
            Self::Isolated => {
                let mut allow = BTreeSet::new();
                allow.insert(key);
                Self::AllowList(allow)
            }
            Self::AllowList(mut keys) => {
                let _ = keys.insert(key);
                Self::AllowList(keys)
            }
            Self::InheritAll => Self::InheritAll,
        }
    }
}
