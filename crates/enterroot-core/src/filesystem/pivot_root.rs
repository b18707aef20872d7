//! Root filesystem switching via `pivot_root(2)` and `chroot(2)`.
//!
//! `pivot_root` moves the current root to `put_old` inside the new root and
//! makes the new root `/` for every process sharing the mount namespace. A
//! following `chroot("/")` collapses the caller's view onto the new root.

use std::path::Path;

use enterroot_common::error::{EnterError, Result};

/// Switches the root filesystem to `new_root`, moving the old root to `put_old`.
///
/// Both paths may be relative to the current directory; the usual form is
/// `pivot_root(".", ".base")` from inside the new root.
///
/// # Errors
///
/// Returns an error if `pivot_root(2)` fails.
pub fn pivot_root(new_root: &Path, put_old: &Path) -> Result<()> {
    tracing::debug!(
        new_root = %new_root.display(),
        put_old = %put_old.display(),
        "performing pivot_root"
    );
    nix::unistd::pivot_root(new_root, put_old).map_err(|e| EnterError::Syscall {
        operation: "pivot_root",
        message: e.to_string(),
    })
}

/// Changes the root directory of the calling process.
///
/// # Errors
///
/// Returns an error if `chroot(2)` fails.
pub fn chroot(path: &Path) -> Result<()> {
    nix::unistd::chroot(path).map_err(|e| EnterError::Syscall {
        operation: "chroot",
        message: format!("{}: {e}", path.display()),
    })
}

/// Changes the working directory of the calling process.
///
/// # Errors
///
/// Returns an error if `chdir(2)` fails.
pub fn change_dir(path: &Path) -> Result<()> {
    nix::unistd::chdir(path).map_err(|e| EnterError::Syscall {
        operation: "chdir",
        message: format!("{}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroot_into_missing_directory_fails() {
        assert!(chroot(Path::new("/nonexistent/new-root")).is_err());
    }

    #[test]
    fn change_dir_into_missing_directory_names_path() {
        let err = change_dir(Path::new("/nonexistent/data")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/data"));
    }
}
