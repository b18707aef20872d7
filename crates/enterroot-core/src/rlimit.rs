//! Resource limits applied before the bootstrap does anything else.

use enterroot_common::constants::NOFILE_LIMIT;
use nix::sys::resource::{Resource, setrlimit};

/// Raises the open file and process limits.
///
/// `RLIMIT_NOFILE` is set to [`NOFILE_LIMIT`] and `RLIMIT_NPROC` to unlimited.
/// Failures are logged and otherwise ignored: the boot continues with
/// whatever the kernel grants.
pub fn raise_limits() {
    set_limit(Resource::RLIMIT_NOFILE, NOFILE_LIMIT);
    set_limit(Resource::RLIMIT_NPROC, libc::RLIM_INFINITY);
}

fn set_limit(resource: Resource, value: libc::rlim_t) {
    match setrlimit(resource, value, value) {
        Ok(()) => tracing::debug!(?resource, value, "resource limit raised"),
        Err(e) => tracing::warn!(?resource, value, error = %e, "failed to set resource limit"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_limits_never_panics_without_privileges() {
        raise_limits();
    }
}
