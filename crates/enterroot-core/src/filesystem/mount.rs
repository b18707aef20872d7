//! Mount utilities for the root switch.
//!
//! Handles bind mounts of the data directory and a directory root, the
//! read-only squashfs mount of an image root, propagation changes, and the
//! pseudo-filesystems an early init may have to provide itself.

use std::path::Path;

use enterroot_common::constants::PROC_MOUNTINFO;
use enterroot_common::error::{EnterError, Result};
use nix::mount::{MsFlags, mount};

/// Creates a bind mount from `source` onto `target`.
///
/// With `recursive`, submounts of `source` are carried along (`rbind`).
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path, recursive: bool) -> Result<()> {
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        recursive,
        "creating bind mount"
    );
    let mut flags = MsFlags::MS_BIND;
    if recursive {
        flags |= MsFlags::MS_REC;
    }
    mount(Some(source), target, Some("none"), flags, None::<&str>).map_err(|e| {
        EnterError::Mount {
            target: target.to_path_buf(),
            message: format!("bind from {}: {e}", source.display()),
        }
    })
}

/// Mounts a squashfs block device read-only on `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn mount_squashfs(device: &Path, target: &Path) -> Result<()> {
    tracing::debug!(
        device = %device.display(),
        target = %target.display(),
        "mounting squashfs"
    );
    mount(
        Some(device),
        target,
        Some("squashfs"),
        MsFlags::MS_RDONLY,
        None::<&str>,
    )
    .map_err(|e| EnterError::Mount {
        target: target.to_path_buf(),
        message: e.to_string(),
    })
}

/// Recursively marks the mount at `target` and everything below it private.
///
/// Mount and unmount events then no longer propagate to or from the peer
/// group the mount was cloned from.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn make_rprivate(target: &Path) -> Result<()> {
    mount(
        None::<&str>,
        target,
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| EnterError::Mount {
        target: target.to_path_buf(),
        message: format!("making private: {e}"),
    })
}

/// Mounts `/proc` and `/dev` when an early init runs without them.
///
/// `/proc` counts as present when `/proc/self` exists, `/dev` when
/// `/dev/null` exists.
///
/// # Errors
///
/// Returns an error if a required mount fails.
pub fn ensure_early_mounts() -> Result<()> {
    ensure_early_mounts_with(Path::new("/"), mount_pseudo)
}

/// Runs the early mount checks against `root`, handing each missing
/// filesystem type and its target to `mount_fs`.
fn ensure_early_mounts_with(
    root: &Path,
    mut mount_fs: impl FnMut(&str, &Path) -> Result<()>,
) -> Result<()> {
    if !root.join("proc/self").exists() {
        mount_fs("proc", &root.join("proc"))?;
    }
    if !root.join("dev/null").exists() {
        mount_fs("devtmpfs", &root.join("dev"))?;
    }
    Ok(())
}

fn mount_pseudo(fstype: &str, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| EnterError::Io {
        path: target.to_path_buf(),
        source: e,
    })?;
    mount(
        Some(fstype),
        target,
        Some(fstype),
        MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .map_err(|e| EnterError::Mount {
        target: target.to_path_buf(),
        message: e.to_string(),
    })?;
    tracing::info!(fstype, target = %target.display(), "mounted pseudo filesystem");
    Ok(())
}

/// Returns whether `path` is a mount point in the caller's mount namespace.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn is_mounted(path: &Path) -> Result<bool> {
    let mountinfo = std::fs::read_to_string(PROC_MOUNTINFO).map_err(|e| EnterError::Io {
        path: PROC_MOUNTINFO.into(),
        source: e,
    })?;
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Ok(mountinfo_contains(&mountinfo, &resolved))
}

/// Returns whether a `mountinfo` table lists `path` as a mount point.
pub fn mountinfo_contains(mountinfo: &str, path: &Path) -> bool {
    let wanted = path.as_os_str().as_encoded_bytes();
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .any(|mount_point| unescape(mount_point) == wanted)
}

/// Decodes the octal escapes (`\040` for a space) used in `mountinfo`.
fn unescape(field: &str) -> Vec<u8> {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while let Some(&byte) = bytes.get(i) {
        if byte == b'\\' {
            if let Some(decoded) = bytes.get(i + 1..i + 4).and_then(octal_byte) {
                out.push(decoded);
                i += 4;
                continue;
            }
        }
        out.push(byte);
        i += 1;
    }
    out
}

fn octal_byte(digits: &[u8]) -> Option<u8> {
    if !digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
        return None;
    }
    let value = digits
        .iter()
        .fold(0_u32, |acc, d| acc * 8 + u32::from(d - b'0'));
    u8::try_from(value).ok()
}
