//! Kernel squashfs support detection.

use std::path::Path;
use std::process::{Command, Stdio};

use enterroot_common::constants::PROC_FILESYSTEMS;
use enterroot_common::error::{EnterError, Result};

const SQUASHFS: &str = "squashfs";

/// Verifies that the running kernel can mount squashfs.
///
/// If `/proc/filesystems` does not list squashfs, the module is loaded with
/// `modprobe` and the registry is read again.
///
/// # Errors
///
/// Returns [`EnterError::SquashfsUnsupported`] if support is still missing.
/// Callers decide whether that voids the mount attempt.
pub fn check_squashfs() -> Result<()> {
    check_squashfs_with(Path::new(PROC_FILESYSTEMS), || load_module(SQUASHFS))
}

fn check_squashfs_with(registry: &Path, load: impl FnOnce()) -> Result<()> {
    if !registry_lists(registry, SQUASHFS) {
        load();
    }

    if registry_lists(registry, SQUASHFS) {
        return Ok(());
    }

    Err(EnterError::SquashfsUnsupported {
        message: "this kernel does not support squashfs, please enable it. \
                  On Fedora you may need to run \"dnf install kernel-modules-$(uname -r)\""
            .into(),
    })
}

fn registry_lists(registry: &Path, fstype: &str) -> bool {
    match std::fs::read_to_string(registry) {
        Ok(content) => content.contains(fstype),
        Err(e) => {
            tracing::error!(path = %registry.display(), error = %e, "failed to read filesystem registry");
            false
        }
    }
}

/// Loads a kernel module with `modprobe`, best-effort.
pub(crate) fn load_module(name: &str) {
    let modprobe = match which::which("modprobe") {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!(module = name, error = %e, "modprobe not available");
            return;
        }
    };
    match Command::new(&modprobe)
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => tracing::debug!(module = name, "kernel module loaded"),
        Ok(status) => tracing::debug!(module = name, %status, "modprobe failed"),
        Err(e) => tracing::debug!(module = name, error = %e, "failed to run modprobe"),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn listed_support_skips_module_load() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let registry = dir.path().join("filesystems");
        std::fs::write(&registry, "nodev\tproc\n\tsquashfs\n\text4\n").expect("write failed");
        let loaded = Cell::new(false);

        check_squashfs_with(&registry, || loaded.set(true)).expect("squashfs should be supported");
        assert!(!loaded.get());
    }

    #[test]
    fn module_load_that_registers_squashfs_succeeds() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let registry = dir.path().join("filesystems");
        std::fs::write(&registry, "nodev\tproc\n").expect("write failed");

        let result = check_squashfs_with(&registry, || {
            std::fs::write(&registry, "nodev\tproc\n\tsquashfs\n").expect("write failed");
        });
        assert!(result.is_ok());
    }

    #[test]
    fn missing_support_is_descriptive() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let registry = dir.path().join("filesystems");
        std::fs::write(&registry, "nodev\tproc\n\text4\n").expect("write failed");
        let loaded = Cell::new(false);

        let err = check_squashfs_with(&registry, || loaded.set(true)).unwrap_err();
        assert!(loaded.get());
        assert!(matches!(err, EnterError::SquashfsUnsupported { .. }));
        assert!(err.to_string().contains("does not support squashfs"));
    }

    #[test]
    fn unreadable_registry_counts_as_unsupported() {
        let result = check_squashfs_with(Path::new("/nonexistent/filesystems"), || {});
        assert!(result.is_err());
    }
}
