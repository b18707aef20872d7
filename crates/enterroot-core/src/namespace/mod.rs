//! Re-execution into fresh namespaces.
//!
//! The bootstrap hands over to its post-namespace half by re-executing the
//! running binary as `enter-root`. How depends on where it runs: as PID 1 it
//! replaces itself, since PID 1 cannot leave its PID namespace; anywhere else
//! it spawns an isolated child and waits for it.

pub mod isolate;

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use enterroot_common::config::BootstrapEnv;
use enterroot_common::constants::{REEXEC_NAME, SELF_EXE};
use enterroot_common::error::{EnterError, Result};

/// How the post-namespace process is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Exec in place. Used when running as PID 1.
    ReplaceSelf,
    /// Spawn a child in new namespaces and wait for it.
    SpawnChild,
}

impl LaunchMode {
    /// Resolves the mode for the calling process.
    #[must_use]
    pub fn detect() -> Self {
        Self::for_pid(nix::unistd::getpid().as_raw())
    }

    /// Resolves the mode for a process with the given PID.
    #[must_use]
    pub const fn for_pid(pid: i32) -> Self {
        if pid == 1 {
            Self::ReplaceSelf
        } else {
            Self::SpawnChild
        }
    }
}

/// Builds the command that re-executes this binary as `enter-root`.
///
/// `args` are passed through untouched; `env` is layered over the inherited
/// environment.
#[must_use]
pub fn reexec_command(env: &BootstrapEnv, args: &[OsString]) -> Command {
    let mut command = Command::new(SELF_EXE);
    let _ = command.arg0(REEXEC_NAME).args(args);
    env.apply(&mut command);
    command
}

/// Starts the post-namespace process.
///
/// With [`LaunchMode::ReplaceSelf`] this only returns on failure. With
/// [`LaunchMode::SpawnChild`] it returns once the child exits successfully.
///
/// # Errors
///
/// Returns an error if the PID namespace cannot be created, the binary
/// cannot be executed, or the child exits unsuccessfully.
pub fn launch(mode: LaunchMode, env: &BootstrapEnv, args: &[OsString]) -> Result<()> {
    let mut command = reexec_command(env, args);
    tracing::debug!(?mode, ?args, "re-executing into new namespaces");

    match mode {
        LaunchMode::ReplaceSelf => {
            let source = command.exec();
            Err(EnterError::Exec {
                program: PathBuf::from(SELF_EXE),
                source,
            })
        }
        LaunchMode::SpawnChild => {
            isolate::create_pid_namespace()?;
            isolate::isolate_on_spawn(&mut command);
            let status = command.status().map_err(|e| EnterError::Exec {
                program: PathBuf::from(SELF_EXE),
                source: e,
            })?;
            if status.success() {
                Ok(())
            } else {
                Err(EnterError::ChildFailed {
                    status: status.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn pid_one_replaces_itself() {
        assert_eq!(LaunchMode::for_pid(1), LaunchMode::ReplaceSelf);
        assert_eq!(LaunchMode::for_pid(2), LaunchMode::SpawnChild);
        assert_eq!(LaunchMode::for_pid(4242), LaunchMode::SpawnChild);
    }

    #[test]
    fn test_process_is_not_pid_one() {
        assert_eq!(LaunchMode::detect(), LaunchMode::SpawnChild);
    }

    #[test]
    fn reexec_command_carries_args_and_env() {
        let env = BootstrapEnv {
            data: Some("/k3os/data".into()),
            root: Some("/sbin/init.squashfs".into()),
            device: Some("/dev/loop0".into()),
            debug: false,
        };
        let args = vec![OsString::from("--single"), OsString::from("quiet")];
        let command = reexec_command(&env, &args);

        assert_eq!(command.get_program(), Path::new(SELF_EXE));
        let passed: Vec<_> = command.get_args().collect();
        assert_eq!(passed, vec!["--single", "quiet"]);

        let envs: Vec<_> = command
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_str()?.to_owned(), v?.to_str()?.to_owned())))
            .collect();
        assert!(envs.contains(&("ENTER_DATA".into(), "/k3os/data".into())));
        assert!(envs.contains(&("ENTER_DEVICE".into(), "/dev/loop0".into())));
        assert!(envs.contains(&("ENTER_VERSION".into(), "1".into())));
    }
}
