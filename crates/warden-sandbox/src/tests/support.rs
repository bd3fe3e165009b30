//! Shared helpers for sandbox tests.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::sandbox::{SandboxChild, SandboxCommand};

pub fn resolve_binary(candidates: &[&str]) -> PathBuf {
    for candidate in candidates {
        let path = Path::new(candidate);
        if path.exists() {
            return path.to_path_buf();
        }
    }
    panic!("no candidate binary found in {candidates:?}");
}

pub fn shell() -> PathBuf {
    resolve_binary(&["/bin/sh", "/usr/bin/sh"])
}

/// Builds `sh -c <script>` with stdout piped.
pub fn shell_command(script: &str) -> SandboxCommand {
    let mut command = SandboxCommand::new(shell());
    command.arg("-c").arg(script);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::null());
    command
}

/// Reads the child's stdout to completion.
pub fn read_stdout(child: &mut SandboxChild) -> String {
    let mut stdout = child.take_stdout().expect("stdout piped");
    let mut output = String::new();
    stdout
        .read_to_string(&mut output)
        .unwrap_or_else(|error| panic!("failed to read child output: {error}"));
    output
}
