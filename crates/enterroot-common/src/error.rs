//! Unified error type for the enterroot workspace.
//!
//! Every failure the bootstrap can hit maps onto one variant here. Variants
//! carry enough context (paths, operation names) to be useful on a console
//! with nothing else attached, since a failed boot rarely has a debugger.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum EnterError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid or missing.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("failed to find {kind} {path}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Path of the missing resource.
        path: PathBuf,
    },

    /// No embedded root image was found in the executable.
    #[error("failed to find image in file {path}")]
    ImageNotFound {
        /// Executable that was scanned.
        path: PathBuf,
    },

    /// A `mount(2)` call failed.
    #[error("mounting {target} failed: {message}")]
    Mount {
        /// Mount point of the failed mount.
        target: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A privileged syscall other than `mount(2)` failed.
    #[error("{operation} failed: {message}")]
    Syscall {
        /// Name of the operation, e.g. `pivot_root`.
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// Mounting the squashfs root failed, possibly because the kernel lacks support.
    #[error("mounting squashfs {device} on {target} failed: {message}{}", support_suffix(.support.as_deref()))]
    SquashfsMount {
        /// Loop device holding the image.
        device: PathBuf,
        /// Mount point.
        target: PathBuf,
        /// Description of the mount failure.
        message: String,
        /// Result of the squashfs support check, if it also failed.
        support: Option<String>,
    },

    /// The running kernel cannot mount squashfs.
    #[error("{message}")]
    SquashfsUnsupported {
        /// Description with a remediation hint.
        message: String,
    },

    /// An artifact is neither a directory nor a regular file.
    #[error("unsupported file type: {path}")]
    UnsupportedFileType {
        /// Offending entry.
        path: PathBuf,
    },

    /// Replacing the process image failed.
    #[error("failed to exec {program}: {source}")]
    Exec {
        /// Program that could not be executed.
        program: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The namespaced child exited unsuccessfully.
    #[error("bootstrap child exited with {status}")]
    ChildFailed {
        /// Exit status as reported by the OS.
        status: String,
    },
}

fn support_suffix(support: Option<&str>) -> String {
    support.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, EnterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squashfs_mount_includes_support_diagnostic() {
        let err = EnterError::SquashfsMount {
            device: "/dev/loop0".into(),
            target: "/data/usr".into(),
            message: "ENODEV: No such device".into(),
            support: Some("this kernel does not support squashfs".into()),
        };
        let text = err.to_string();
        assert!(text.contains("/dev/loop0"));
        assert!(text.contains("ENODEV"));
        assert!(text.ends_with("(this kernel does not support squashfs)"));
    }

    #[test]
    fn squashfs_mount_without_support_error_has_no_suffix() {
        let err = EnterError::SquashfsMount {
            device: "/dev/loop0".into(),
            target: "/data/usr".into(),
            message: "EBUSY".into(),
            support: None,
        };
        assert!(err.to_string().ends_with("EBUSY"));
    }

    #[test]
    fn not_found_names_the_missing_path() {
        let err = EnterError::NotFound {
            kind: "init",
            path: "/usr/init".into(),
        };
        assert_eq!(err.to_string(), "failed to find init /usr/init");
    }
}
