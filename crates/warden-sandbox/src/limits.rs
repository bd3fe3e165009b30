//! `setrlimit` helpers applied in the child between `fork` and `exec`.
//!
//! Everything here runs inside a `pre_exec` hook, so it must stay
//! async-signal-safe: no allocation, no locking, no logging.

use std::io;

use crate::profile::ResourceLimits;

#[cfg(target_os = "linux")]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(target_os = "linux")))]
type RlimitResource = libc::c_int;

/// Applies every configured ceiling to the calling process.
#[cfg(unix)]
pub(crate) fn apply(limits: ResourceLimits) -> io::Result<()> {
    if let Some(bytes) = limits.memory_bytes {
        // macOS rejects RLIMIT_AS; the remaining limits still apply there.
        if let Err(error) = set_rlimit(libc::RLIMIT_AS, bytes) {
            if cfg!(target_os = "linux") {
                return Err(error);
            }
        }
    }
    if let Some(seconds) = limits.cpu_seconds {
        set_rlimit(libc::RLIMIT_CPU, seconds)?;
    }
    if let Some(count) = limits.open_files {
        set_rlimit(libc::RLIMIT_NOFILE, count)?;
    }
    Ok(())
}

/// Pins both the soft and hard limit to `limit`, capped at the existing
/// hard limit.
///
/// Lowering the hard limit is irreversible for an unprivileged process, so
/// the child cannot lift the ceiling again.
#[cfg(unix)]
fn set_rlimit(resource: RlimitResource, limit: u64) -> io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `current` is a valid, writable rlimit for the duration of the call.
    let ret = unsafe { libc::getrlimit(resource, &raw mut current) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    let requested = libc::rlim_t::try_from(limit).unwrap_or(libc::RLIM_INFINITY);
    let hard = current.rlim_max;
    let ceiling = if hard == libc::RLIM_INFINITY || requested < hard {
        requested
    } else {
        hard
    };
    let rlim = libc::rlimit {
        rlim_cur: ceiling,
        rlim_max: ceiling,
    };
    // SAFETY: `rlim` is a valid rlimit value.
    let applied = unsafe { libc::setrlimit(resource, &raw const rlim) };
    if applied != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
