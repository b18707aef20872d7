//! Namespace isolation for the spawned bootstrap child.
//!
//! The parent moves its future children into a new PID namespace; the child
//! itself creates private mount, UTS, and IPC namespaces between `fork` and
//! `exec`, so the mounts it makes never reach the host.

use std::os::unix::process::CommandExt;
use std::process::Command;

use enterroot_common::error::{EnterError, Result};
use nix::mount::{MsFlags, mount};
use nix::sched::{CloneFlags, unshare};
use nix::sys::signal::Signal;

/// Creates a new PID namespace for the children of the calling process.
///
/// The next child spawned sees itself as PID 1.
///
/// # Errors
///
/// Returns an error if the `unshare(CLONE_NEWPID)` syscall fails.
pub fn create_pid_namespace() -> Result<()> {
    unshare(CloneFlags::CLONE_NEWPID).map_err(|e| EnterError::Syscall {
        operation: "unshare(CLONE_NEWPID)",
        message: e.to_string(),
    })?;
    tracing::debug!("PID namespace created");
    Ok(())
}

/// Arranges for `command` to isolate itself before it execs.
///
/// The child unshares mount, UTS, and IPC namespaces, marks `/` recursively
/// private, and dies with SIGKILL when the parent does.
pub fn isolate_on_spawn(command: &mut Command) {
    // SAFETY: `isolate_child` only issues raw syscalls (unshare, mount,
    // prctl) and touches no locks or allocator state, so it is safe to run
    // between fork and exec.
    let _ = unsafe { command.pre_exec(isolate_child) };
}

fn isolate_child() -> std::io::Result<()> {
    unshare(CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWIPC)?;
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )?;
    nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)?;
    Ok(())
}
