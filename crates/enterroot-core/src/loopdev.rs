//! Loop device attachment for file-backed root images.
//!
//! Talks to the kernel loop driver directly through `/dev/loop-control` and
//! the `LOOP_*` ioctls. Devices are attached read-only at the image offset
//! and detached when the [`LoopDevice`] handle is dropped.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use enterroot_common::constants::{LOOP_CONTROL, LOOP_CONTROL_DEV};
use enterroot_common::error::{EnterError, Result};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};

const LOOP_SET_FD: libc::c_ulong = 0x4C00;
const LOOP_CLR_FD: libc::c_ulong = 0x4C01;
const LOOP_SET_STATUS64: libc::c_ulong = 0x4C04;
const LOOP_GET_STATUS64: libc::c_ulong = 0x4C05;
const LOOP_CTL_GET_FREE: libc::c_ulong = 0x4C82;

const LO_FLAGS_READ_ONLY: u32 = 1;
const LO_FLAGS_AUTOCLEAR: u32 = 4;
const LO_NAME_SIZE: usize = 64;
const LO_KEY_SIZE: usize = 32;

/// Mirror of the kernel's `struct loop_info64`.
#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy)]
struct LoopInfo64 {
    lo_device: u64,
    lo_inode: u64,
    lo_rdevice: u64,
    lo_offset: u64,
    lo_sizelimit: u64,
    lo_number: u32,
    lo_encrypt_type: u32,
    lo_encrypt_key_size: u32,
    lo_flags: u32,
    lo_file_name: [u8; LO_NAME_SIZE],
    lo_crypt_name: [u8; LO_NAME_SIZE],
    lo_encrypt_key: [u8; LO_KEY_SIZE],
    lo_init: [u64; 2],
}

impl LoopInfo64 {
    const fn zeroed() -> Self {
        Self {
            lo_device: 0,
            lo_inode: 0,
            lo_rdevice: 0,
            lo_offset: 0,
            lo_sizelimit: 0,
            lo_number: 0,
            lo_encrypt_type: 0,
            lo_encrypt_key_size: 0,
            lo_flags: 0,
            lo_file_name: [0; LO_NAME_SIZE],
            lo_crypt_name: [0; LO_NAME_SIZE],
            lo_encrypt_key: [0; LO_KEY_SIZE],
            lo_init: [0; 2],
        }
    }

    fn for_image(backing: &Path, offset: u64) -> Self {
        let mut info = Self::zeroed();
        info.lo_offset = offset;
        info.lo_flags = LO_FLAGS_READ_ONLY;
        let name = backing.as_os_str().as_bytes();
        let len = name.len().min(LO_NAME_SIZE - 1);
        info.lo_file_name[..len].copy_from_slice(&name[..len]);
        info
    }
}

/// A loop device bound to a root image.
///
/// Dropping the handle detaches the device. If the device is still mounted
/// the kernel defers the detach until the last user goes away.
#[derive(Debug)]
pub struct LoopDevice {
    path: PathBuf,
    file: File,
}

impl LoopDevice {
    /// Attaches `backing` to a free loop device, read-only, starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if no loop device can be allocated or opened, the
    /// backing file cannot be opened, or any `LOOP_*` ioctl fails. A device
    /// that was bound before the failure is released again.
    pub fn attach(backing: &Path, offset: u64) -> Result<Self> {
        let control = open(Path::new(LOOP_CONTROL))?;
        // SAFETY: LOOP_CTL_GET_FREE takes no argument and `control` is an
        // open descriptor for /dev/loop-control.
        let index = unsafe { libc::ioctl(control.as_raw_fd(), LOOP_CTL_GET_FREE as _) };
        if index < 0 {
            return Err(syscall_error("LOOP_CTL_GET_FREE"));
        }

        let path = PathBuf::from(format!("/dev/loop{index}"));
        let file = open(&path)?;
        let image = open(backing)?;

        // SAFETY: both descriptors are open for the duration of the call;
        // LOOP_SET_FD takes the backing descriptor by value.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), LOOP_SET_FD as _, image.as_raw_fd()) };
        if rc < 0 {
            return Err(syscall_error("LOOP_SET_FD"));
        }

        let device = Self { path, file };
        let info = LoopInfo64::for_image(backing, offset);
        device.set_status(&info)?;

        tracing::debug!(
            device = %device.path.display(),
            backing = %backing.display(),
            offset,
            "loop device attached"
        );
        Ok(device)
    }

    /// Returns the device node path, e.g. `/dev/loop0`.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the device auto-clearing after `delay`, in the background.
    ///
    /// Auto-clear makes the kernel release the device once its last user
    /// closes it. Setting it before the mount has opened the device would
    /// let the device disappear underneath the mount, so the flag is applied
    /// only after the grace period. Failures are ignored.
    pub fn schedule_autoclear(&self, delay: Duration) {
        let Ok(file) = self.file.try_clone() else {
            return;
        };
        let path = self.path.clone();
        let _ = std::thread::spawn(move || {
            std::thread::sleep(delay);
            let Ok(mut info) = get_status(&file) else {
                return;
            };
            info.lo_flags |= LO_FLAGS_AUTOCLEAR;
            if set_status(&file, &info).is_ok() {
                tracing::debug!(device = %path.display(), "loop device marked auto-clear");
            }
        });
    }

    fn set_status(&self, info: &LoopInfo64) -> Result<()> {
        if let Err(e) = set_status(&self.file, info) {
            let _ = clear_fd(&self.file);
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for LoopDevice {
    fn drop(&mut self) {
        if let Err(e) = clear_fd(&self.file) {
            tracing::debug!(device = %self.path.display(), error = %e, "loop detach failed");
        }
    }
}

/// Makes sure the loop driver is reachable through `/dev/loop-control`.
///
/// Loads the `loop` module (best-effort) and creates the control node if it
/// is missing.
pub fn ensure_loop_control() {
    crate::squashfs::load_module("loop");

    let control = Path::new(LOOP_CONTROL);
    if control.exists() {
        return;
    }

    let (major, minor) = LOOP_CONTROL_DEV;
    match mknod(
        control,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(0o660),
        makedev(major, minor),
    ) {
        Ok(()) => tracing::debug!("created {LOOP_CONTROL}"),
        Err(e) => tracing::warn!(error = %e, "failed to create {LOOP_CONTROL}"),
    }
}

fn open(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| EnterError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

fn get_status(file: &File) -> Result<LoopInfo64> {
    let mut info = LoopInfo64::zeroed();
    // SAFETY: `info` is a properly sized and aligned loop_info64 that the
    // kernel fills in; the descriptor is an open loop device.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            LOOP_GET_STATUS64 as _,
            std::ptr::from_mut(&mut info),
        )
    };
    if rc < 0 {
        return Err(syscall_error("LOOP_GET_STATUS64"));
    }
    Ok(info)
}

fn set_status(file: &File, info: &LoopInfo64) -> Result<()> {
    // SAFETY: `info` points to a valid loop_info64 that the kernel only reads.
    let rc = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            LOOP_SET_STATUS64 as _,
            std::ptr::from_ref(info),
        )
    };
    if rc < 0 {
        return Err(syscall_error("LOOP_SET_STATUS64"));
    }
    Ok(())
}

fn clear_fd(file: &File) -> Result<()> {
    // SAFETY: LOOP_CLR_FD takes no argument; the descriptor is an open loop device.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), LOOP_CLR_FD as _, 0) };
    if rc < 0 {
        return Err(syscall_error("LOOP_CLR_FD"));
    }
    Ok(())
}

fn syscall_error(operation: &'static str) -> EnterError {
    EnterError::Syscall {
        operation,
        message: std::io::Error::last_os_error().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_info_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<LoopInfo64>(), 232);
    }

    #[test]
    fn image_info_is_read_only_at_offset() {
        let info = LoopInfo64::for_image(Path::new("/sbin/init"), 8192);
        assert_eq!(info.lo_offset, 8192);
        assert_eq!(info.lo_flags & LO_FLAGS_READ_ONLY, LO_FLAGS_READ_ONLY);
        assert_eq!(info.lo_flags & LO_FLAGS_AUTOCLEAR, 0);
        assert_eq!(&info.lo_file_name[..10], b"/sbin/init");
        assert_eq!(info.lo_file_name[10], 0);
    }

    #[test]
    fn long_backing_names_are_truncated_and_terminated() {
        let long = format!("/{}", "a".repeat(200));
        let info = LoopInfo64::for_image(Path::new(&long), 0);
        assert_eq!(info.lo_file_name[LO_NAME_SIZE - 1], 0);
        assert_eq!(info.lo_file_name[LO_NAME_SIZE - 2], b'a');
    }

    #[test]
    fn attach_missing_backing_file_fails() {
        let result = LoopDevice::attach(Path::new("/nonexistent/root.squashfs"), 0);
        assert!(result.is_err());
    }
}
