//! Unit tests for sandbox configuration helpers.

use std::path::PathBuf;

use crate::error::SandboxError;
use crate::profile::{EnvironmentPolicy, ResourceLimits, SandboxProfile};
use crate::sandbox::{Sandbox, SandboxCommand};

#[test]
fn new_profile_is_restrictive() {
    let profile = SandboxProfile::new();
    assert!(profile.executable_paths().is_empty());
    assert_eq!(profile.environment_policy(), &EnvironmentPolicy::Isolated);
    assert!(profile.injected_environment().is_empty());
    assert_eq!(profile.limits(), ResourceLimits::default());
}

#[test]
fn environment_allowlist_deduplicates_entries() {
    let profile = SandboxProfile::new()
        .allow_environment_variable("KEEP_ME")
        .allow_environment_variable("KEEP_ME");

    match profile.environment_policy() {
        EnvironmentPolicy::AllowList(keys) => {
            assert_eq!(keys.len(), 1);
            assert!(keys.contains("KEEP_ME"));
        }
        other => panic!("unexpected environment policy: {other:?}"),
    }
}

#[test]
fn full_environment_absorbs_allowlist() {
    let profile = SandboxProfile::new()
        .allow_full_environment()
        .allow_environment_variable("IGNORED");
    assert_eq!(profile.environment_policy(), &EnvironmentPolicy::InheritAll);
}

#[test]
fn limits_are_recorded() {
    let profile = SandboxProfile::new()
        .limit_memory_bytes(1024)
        .limit_cpu_seconds(3)
        .limit_open_files(16);
    assert_eq!(
        profile.limits(),
        ResourceLimits {
            memory_bytes: Some(1024),
            cpu_seconds: Some(3),
            open_files: Some(16),
        }
    );
}

#[test]
fn injected_variables_are_recorded() {
    let profile = SandboxProfile::new().set_environment_variable("WARDEN_ENTRYPOINT", "handle");
    assert_eq!(
        profile
            .injected_environment()
            .get("WARDEN_ENTRYPOINT")
            .map(String::as_str),
        Some("handle")
    );
}

#[test]
fn relative_program_is_rejected() {
    let sandbox = Sandbox::new(SandboxProfile::new());
    let err = sandbox
        .spawn(SandboxCommand::new("sh"))
        .expect_err("relative path");
    assert!(matches!(err, SandboxError::ProgramNotAbsolute(_)));
}

#[test]
fn missing_program_is_rejected() {
    let missing = PathBuf::from("/nonexistent/warden-plugin");
    let sandbox = Sandbox::new(SandboxProfile::new().allow_executable(&missing));
    let err = sandbox
        .spawn(SandboxCommand::new(&missing))
        .expect_err("missing program");
    assert!(matches!(err, SandboxError::MissingPath { .. }));
}
