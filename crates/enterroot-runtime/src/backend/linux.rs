//! Linux backend issuing the real syscalls.

use std::cell::RefCell;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use enterroot_common::error::{EnterError, Result};
use enterroot_core::filesystem::{mount, pivot_root};
use enterroot_core::loopdev::LoopDevice;

use super::{BootBackend, ExecRequest};

/// Backend that talks to the running kernel.
///
/// Loop devices attached through it are detached when the backend is
/// dropped, unless the process has been replaced by then.
#[derive(Debug, Default)]
pub struct LinuxBootBackend {
    devices: RefCell<Vec<LoopDevice>>,
}

impl LinuxBootBackend {
    /// Creates a backend with no attached devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BootBackend for LinuxBootBackend {
    fn is_mounted(&self, path: &Path) -> Result<bool> {
        mount::is_mounted(path)
    }

    fn bind_mount(&self, source: &Path, target: &Path, recursive: bool) -> Result<()> {
        mount::bind_mount(source, target, recursive)
    }

    fn attach_loop(&self, image: &Path, offset: u64) -> Result<PathBuf> {
        let device = LoopDevice::attach(image, offset)?;
        let path = device.path().to_path_buf();
        self.devices.borrow_mut().push(device);
        Ok(path)
    }

    fn check_squashfs(&self) -> Result<()> {
        enterroot_core::squashfs::check_squashfs()
    }

    fn mount_squashfs(&self, device: &Path, target: &Path) -> Result<()> {
        mount::mount_squashfs(device, target)
    }

    fn migrate(&self, source: &Path, dest: &Path) -> Result<()> {
        enterroot_core::migrate::migrate(source, dest)
    }

    fn change_dir(&self, path: &Path) -> Result<()> {
        pivot_root::change_dir(path)
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        pivot_root::pivot_root(new_root, put_old)
    }

    fn make_private(&self, target: &Path) -> Result<()> {
        mount::make_rprivate(target)
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        pivot_root::chroot(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn exec(&self, request: &ExecRequest) -> Result<()> {
        let mut command = Command::new(&request.program);
        if let Some((argv0, args)) = request.argv.split_first() {
            let _ = command.arg0(argv0).args(args);
        }
        let _ = command.env_clear().envs(request.env.iter().cloned());
        let source = command.exec();
        Err(EnterError::Exec {
            program: request.program.clone(),
            source,
        })
    }
}
