//! System call seam for the bootstrap.
//!
//! The [`Bootstrap`](crate::bootstrap::Bootstrap) state machine decides what
//! happens and in which order; a [`BootBackend`] carries it out. The Linux
//! backend issues the real syscalls, tests substitute a recording fake.

pub mod linux;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use enterroot_common::error::Result;

/// Final hand-off to the real init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Program to execute.
    pub program: PathBuf,
    /// Full argument vector, `argv[0]` included.
    pub argv: Vec<OsString>,
    /// Complete environment of the new process.
    pub env: Vec<(OsString, OsString)>,
}

/// Privileged operations the bootstrap depends on.
pub trait BootBackend {
    /// Returns whether `path` is a mount point.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    fn is_mounted(&self, path: &Path) -> Result<bool>;

    /// Bind-mounts `source` onto `target`, recursively if requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn bind_mount(&self, source: &Path, target: &Path, recursive: bool) -> Result<()>;

    /// Attaches `image` at `offset` to a loop device and returns its path.
    ///
    /// The device stays attached for the lifetime of the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if no loop device can be set up.
    fn attach_loop(&self, image: &Path, offset: u64) -> Result<PathBuf>;

    /// Checks that the kernel can mount squashfs, loading support if needed.
    ///
    /// # Errors
    ///
    /// Returns an error describing missing support.
    fn check_squashfs(&self) -> Result<()>;

    /// Mounts `device` read-only as squashfs on `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_squashfs(&self, device: &Path, target: &Path) -> Result<()>;

    /// Moves the artifacts under `source` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be migrated.
    fn migrate(&self, source: &Path, dest: &Path) -> Result<()>;

    /// Changes the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `chdir(2)` fails.
    fn change_dir(&self, path: &Path) -> Result<()>;

    /// Makes `new_root` the root, moving the old root to `put_old`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pivot_root(2)` fails.
    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()>;

    /// Recursively marks the mount at `target` private.
    ///
    /// # Errors
    ///
    /// Returns an error if the remount fails.
    fn make_private(&self, target: &Path) -> Result<()>;

    /// Changes the root directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `chroot(2)` fails.
    fn chroot(&self, path: &Path) -> Result<()>;

    /// Returns whether `path` exists as seen from the current root.
    fn exists(&self, path: &Path) -> bool;

    /// Replaces the current process. A real backend returns only on failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be executed.
    fn exec(&self, request: &ExecRequest) -> Result<()>;
}

impl<T: BootBackend + ?Sized> BootBackend for &T {
    fn is_mounted(&self, path: &Path) -> Result<bool> {
        (**self).is_mounted(path)
    }

    fn bind_mount(&self, source: &Path, target: &Path, recursive: bool) -> Result<()> {
        (**self).bind_mount(source, target, recursive)
    }

    fn attach_loop(&self, image: &Path, offset: u64) -> Result<PathBuf> {
        (**self).attach_loop(image, offset)
    }

    fn check_squashfs(&self) -> Result<()> {
        (**self).check_squashfs()
    }

    fn mount_squashfs(&self, device: &Path, target: &Path) -> Result<()> {
        (**self).mount_squashfs(device, target)
    }

    fn migrate(&self, source: &Path, dest: &Path) -> Result<()> {
        (**self).migrate(source, dest)
    }

    fn change_dir(&self, path: &Path) -> Result<()> {
        (**self).change_dir(path)
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        (**self).pivot_root(new_root, put_old)
    }

    fn make_private(&self, target: &Path) -> Result<()> {
        (**self).make_private(target)
    }

    fn chroot(&self, path: &Path) -> Result<()> {
        (**self).chroot(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn exec(&self, request: &ExecRequest) -> Result<()> {
        (**self).exec(request)
    }
}
