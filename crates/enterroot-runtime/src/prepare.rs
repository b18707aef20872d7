//! Entry points on either side of the namespace switch.
//!
//! [`mount`] runs in the process that was started as init (or by hand): it
//! makes sure loop devices work, finds the root, attaches it, and re-executes
//! into fresh namespaces. The re-executed process lands in [`enter`], which
//! drives the [`Bootstrap`] through the Linux backend.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use enterroot_common::config::BootstrapEnv;
use enterroot_common::constants::AUTOCLEAR_DELAY;
use enterroot_common::error::Result;
use enterroot_common::types::RootSource;
use enterroot_core::cmdline::kernel_cmdline_contains;
use enterroot_core::filesystem::mount::ensure_early_mounts;
use enterroot_core::locate::RootLocator;
use enterroot_core::loopdev::{LoopDevice, ensure_loop_control};
use enterroot_core::namespace::{self, LaunchMode};
use enterroot_core::rlimit::raise_limits;

use crate::backend::linux::LinuxBootBackend;
use crate::bootstrap::Bootstrap;

/// Options of the pre-namespace phase.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Persistent data directory that becomes the new root.
    pub data_dir: PathBuf,
    /// Arguments passed through to the final init.
    pub args: Vec<OsString>,
    /// Kernel command line word that switches on debug logging.
    pub debug_cmdline: Option<String>,
}

/// Returns whether debug logging is requested.
///
/// Either `ENTER_DEBUG=true` is set, or `cmdline_word` appears on the kernel
/// command line.
#[must_use]
pub fn debug_enabled(env: &BootstrapEnv, cmdline_word: Option<&str>) -> bool {
    env.debug || cmdline_word.is_some_and(kernel_cmdline_contains)
}

/// Runs the pre-namespace phase and hands over to [`enter`].
///
/// The loop device attached here outlives the launch, so a child that fails
/// leaves nothing attached behind.
///
/// # Errors
///
/// Returns an error if the early mounts fail, no root is found, the image
/// cannot be attached, or the re-executed bootstrap fails.
pub fn mount(options: &MountOptions) -> Result<()> {
    raise_limits();
    ensure_early_mounts()?;
    ensure_loop_control();

    let env = BootstrapEnv::from_env()?;
    let debug = debug_enabled(&env, options.debug_cmdline.as_deref());

    let root = RootLocator::for_current_process(&env)?.find()?;
    tracing::info!(root = %root, data = %options.data_dir.display(), "root located");

    let device = attach_image(&root, |path, offset| {
        let device = LoopDevice::attach(path, offset)?;
        device.schedule_autoclear(AUTOCLEAR_DELAY);
        Ok(device)
    })?;
    let env = launch_env(
        env,
        &options.data_dir,
        debug,
        &root,
        device.as_ref().map(LoopDevice::path),
    );

    let result = namespace::launch(LaunchMode::detect(), &env, &options.args);
    drop(device);
    result
}

/// Attaches an image root through `attach`; a directory root needs nothing.
fn attach_image<D>(
    root: &RootSource,
    attach: impl FnOnce(&Path, u64) -> Result<D>,
) -> Result<Option<D>> {
    root.image_offset()
        .map(|offset| attach(root.path(), offset))
        .transpose()
}

/// Fills in the state handed across the re-exec.
fn launch_env(
    mut env: BootstrapEnv,
    data_dir: &Path,
    debug: bool,
    root: &RootSource,
    device: Option<&Path>,
) -> BootstrapEnv {
    env.data = Some(data_dir.to_path_buf());
    env.debug = debug;
    env.root = Some(root.path().to_path_buf());
    env.device = device.map(Path::to_path_buf);
    env
}

/// Runs the post-namespace phase: the full root switch ending in the final init.
///
/// `argv` is handed to the final init unchanged, `argv[0]` included.
///
/// # Errors
///
/// Returns an error if the bootstrap state is invalid or any step of the
/// root switch fails. On success the process has been replaced.
pub fn enter(argv: Vec<OsString>) -> Result<()> {
    raise_limits();
    let env = BootstrapEnv::from_env()?;
    let locator = RootLocator::for_current_process(&env)?;
    let backend = LinuxBootBackend::new();
    let mut bootstrap = Bootstrap::new(&backend, env, std::env::vars_os().collect(), argv, locator);
    bootstrap.run()
}

/// Returns the root this process would boot, without touching anything.
///
/// # Errors
///
/// Returns an error if no root can be found.
pub fn locate() -> Result<RootSource> {
    let env = BootstrapEnv::from_env()?;
    RootLocator::for_current_process(&env)?.find()
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use enterroot_common::config::{ENV_DATA, ENV_DEBUG, ENV_DEVICE, ENV_ROOT};
    use enterroot_common::error::EnterError;
    use enterroot_common::types::RootKind;

    use super::*;

    fn var<'a>(vars: &'a [(&'static str, OsString)], key: &str) -> Option<&'a OsStr> {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_os_str())
    }

    #[test]
    fn environment_switch_enables_debug() {
        let env = BootstrapEnv {
            debug: true,
            ..BootstrapEnv::default()
        };
        assert!(debug_enabled(&env, None));
    }

    #[test]
    fn absent_switches_leave_debug_off() {
        assert!(!debug_enabled(&BootstrapEnv::default(), None));
        assert!(!debug_enabled(
            &BootstrapEnv::default(),
            Some("enterroot.no-such-word-on-any-cmdline")
        ));
    }

    #[test]
    fn directory_root_attaches_nothing() {
        let root = RootSource::new("/k3os/system", RootKind::Directory);
        let device: Option<PathBuf> = attach_image(&root, |_, _| -> Result<PathBuf> {
            panic!("a directory root must not be attached")
        })
        .unwrap();
        assert!(device.is_none());
    }

    #[test]
    fn image_root_is_attached_at_its_offset() {
        let root = RootSource::new("/boot/enterroot", RootKind::ImageFile { offset: 4096 });
        let device = attach_image(&root, |path, offset| {
            assert_eq!(path, Path::new("/boot/enterroot"));
            assert_eq!(offset, 4096);
            Ok(PathBuf::from("/dev/loop3"))
        })
        .unwrap();
        assert_eq!(device, Some(PathBuf::from("/dev/loop3")));
    }

    #[test]
    fn attach_failure_propagates() {
        let root = RootSource::new("/boot/enterroot", RootKind::ImageFile { offset: 0 });
        let err = attach_image(&root, |path, _| -> Result<PathBuf> {
            Err(EnterError::Syscall {
                operation: "LOOP_CONFIGURE",
                message: format!("{} busy", path.display()),
            })
        })
        .unwrap_err();
        assert!(matches!(err, EnterError::Syscall { .. }));
    }

    #[test]
    fn launch_env_exports_data_root_device_and_debug() {
        let root = RootSource::new("/boot/enterroot", RootKind::ImageFile { offset: 0 });
        let env = launch_env(
            BootstrapEnv::default(),
            Path::new("/k3os/data"),
            true,
            &root,
            Some(Path::new("/dev/loop0")),
        );
        let vars = env.to_vars();
        assert_eq!(var(&vars, ENV_DATA), Some(OsStr::new("/k3os/data")));
        assert_eq!(var(&vars, ENV_ROOT), Some(OsStr::new("/boot/enterroot")));
        assert_eq!(var(&vars, ENV_DEVICE), Some(OsStr::new("/dev/loop0")));
        assert_eq!(var(&vars, ENV_DEBUG), Some(OsStr::new("true")));
    }

    #[test]
    fn launch_env_for_directory_root_clears_inherited_device() {
        let inherited = BootstrapEnv {
            device: Some(PathBuf::from("/dev/loop7")),
            debug: true,
            ..BootstrapEnv::default()
        };
        let root = RootSource::new("/k3os/system", RootKind::Directory);
        let env = launch_env(inherited, Path::new("/k3os/data"), false, &root, None);
        let vars = env.to_vars();
        assert_eq!(env.device, None);
        assert_eq!(var(&vars, ENV_DEVICE), Some(OsStr::new("")));
        assert_eq!(var(&vars, ENV_DEBUG), None);
        assert_eq!(env.root, Some(PathBuf::from("/k3os/system")));
    }
}
