//! System-wide constants and well-known paths.

use std::time::Duration;

/// `argv[0]` used when re-executing into the new namespaces.
pub const REEXEC_NAME: &str = "enter-root";

/// The running executable, re-executed into the new namespaces.
pub const SELF_EXE: &str = "/proc/self/exe";

/// Marker preceding a root image appended to the executable.
///
/// Stored upper case and lowered at runtime so that the executable does not
/// contain the search token itself.
pub const IMAGE_MAGIC: &str = "_SQMAGIC_";

/// Suffixes probed next to the executable for a sibling root image.
pub const ROOT_SUFFIXES: [&str; 2] = [".root", ".squashfs"];

/// Read size used when scanning the executable for [`IMAGE_MAGIC`].
pub const SCAN_CHUNK_SIZE: usize = 8192;

/// Buffer size used when migrating artifact files.
pub const COPY_BUFFER_SIZE: usize = 32768;

/// Directory under the data directory that receives the real root.
pub const USR_DIR: &str = "usr";

/// Hidden directory under the data directory that receives the old root.
pub const BASE_DIR: &str = ".base";

/// Top-level compatibility symlinks pointing into [`USR_DIR`].
pub const COMPAT_SYMLINKS: [&str; 3] = ["lib", "bin", "sbin"];

/// Final init program, resolved after the pivot.
pub const INIT_PATH: &str = "/usr/init";

/// Live tree migrated into the data directory before the pivot.
pub const ARTIFACT_SOURCE: &str = "/var";

/// Open file descriptor ceiling applied at startup.
pub const NOFILE_LIMIT: u64 = 1_048_576;

/// Grace period before a loop device is marked auto-clearing.
pub const AUTOCLEAR_DELAY: Duration = Duration::from_secs(3);

/// Kernel filesystem registry.
pub const PROC_FILESYSTEMS: &str = "/proc/filesystems";

/// Kernel command line.
pub const PROC_CMDLINE: &str = "/proc/cmdline";

/// Mount table of the calling process.
pub const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Loop device allocator.
pub const LOOP_CONTROL: &str = "/dev/loop-control";

/// Device numbers of [`LOOP_CONTROL`].
pub const LOOP_CONTROL_DEV: (u64, u64) = (10, 237);

/// Application name used in CLI output.
pub const APP_NAME: &str = "enterroot";
