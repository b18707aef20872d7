//! Migration of early-boot artifacts into persistent storage.
//!
//! Whatever the early init wrote under `/var` before the real root existed is
//! moved into the data directory so it survives the pivot. Directories are
//! recreated first, then files are copied and their sources removed.

use std::fs::{self, DirBuilder, File, FileTimes, Metadata, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use enterroot_common::constants::COPY_BUFFER_SIZE;
use enterroot_common::error::{EnterError, Result};

/// Moves the tree at `src_root` to `dest_root`, preserving metadata.
///
/// Pass one recreates every directory with its mode, ownership, and
/// timestamps. Pass two copies every regular file and removes the source; a
/// source that cannot be removed is left behind. Directory timestamps are
/// re-applied last since pass two touches them. Walks are depth-first in
/// lexical order and never follow symlinks.
///
/// # Errors
///
/// Returns [`EnterError::Config`] when `dest_root` lies inside `src_root`,
/// before anything is created. Returns [`EnterError::UnsupportedFileType`] on
/// the first entry that is neither a directory nor a regular file, and an I/O
/// error for anything else that fails. The walk stops at the first error.
pub fn migrate(src_root: &Path, dest_root: &Path) -> Result<()> {
    tracing::debug!(
        source = %src_root.display(),
        dest = %dest_root.display(),
        "migrating artifacts"
    );

    let canonical_src = fs::canonicalize(src_root).map_err(|e| io_error(src_root, e))?;
    let resolved_dest = resolve(dest_root)?;
    if resolved_dest.starts_with(&canonical_src) {
        return Err(EnterError::Config {
            message: format!(
                "migration destination {} lies inside {}",
                dest_root.display(),
                src_root.display()
            ),
        });
    }

    let mut directories = Vec::new();
    walk(src_root, &mut |path, metadata| {
        if !metadata.is_dir() {
            return Ok(());
        }
        let dest = destination(src_root, dest_root, path);
        create_dir(&dest, metadata)?;
        copy_metadata(metadata, &dest)?;
        directories.push((dest, metadata.clone()));
        Ok(())
    })?;

    let mut buf = vec![0_u8; COPY_BUFFER_SIZE];
    walk(src_root, &mut |path, metadata| {
        let dest = destination(src_root, dest_root, path);
        let file_type = metadata.file_type();
        if file_type.is_dir() {
            return Ok(());
        }
        if !file_type.is_file() {
            return Err(EnterError::UnsupportedFileType {
                path: path.to_path_buf(),
            });
        }
        tracing::debug!(from = %path.display(), to = %dest.display(), "moving file");
        copy_file(path, &dest, metadata, &mut buf)?;
        copy_metadata(metadata, &dest)?;
        if let Err(e) = fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %e, "source left in place");
        }
        Ok(())
    })?;

    for (dest, metadata) in directories.iter().rev() {
        set_times(metadata, dest)?;
    }
    Ok(())
}

/// Visits `path` and everything below it, parents before children.
fn walk(path: &Path, visit: &mut dyn FnMut(&Path, &Metadata) -> Result<()>) -> Result<()> {
    let metadata = fs::symlink_metadata(path).map_err(|e| io_error(path, e))?;
    visit(path, &metadata)?;
    if !metadata.is_dir() {
        return Ok(());
    }

    let mut children = fs::read_dir(path)
        .map_err(|e| io_error(path, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<PathBuf>>>()
        .map_err(|e| io_error(path, e))?;
    children.sort();
    for child in children {
        walk(&child, visit)?;
    }
    Ok(())
}

/// Canonicalizes the deepest existing ancestor of `path` and re-attaches
/// the components that do not exist yet.
fn resolve(path: &Path) -> Result<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        match fs::canonicalize(existing) {
            Ok(base) => return Ok(missing.iter().rev().fold(base, |acc, name| acc.join(name))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(io_error(path, e));
                };
                missing.push(name);
                existing = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
            }
            Err(e) => return Err(io_error(path, e)),
        }
    }
}

fn destination(src_root: &Path, dest_root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(src_root)
        .map_or_else(|_| dest_root.to_path_buf(), |rel| dest_root.join(rel))
}

fn create_dir(dest: &Path, metadata: &Metadata) -> Result<()> {
    match DirBuilder::new().mode(metadata.mode() & 0o7777).create(dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dest.is_dir() => Ok(()),
        Err(e) => Err(io_error(dest, e)),
    }
}

fn copy_file(src: &Path, dest: &Path, metadata: &Metadata, buf: &mut [u8]) -> Result<()> {
    let mut input = File::open(src).map_err(|e| io_error(src, e))?;
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(metadata.mode() & 0o7777)
        .open(dest)
        .map_err(|e| io_error(dest, e))?;

    loop {
        let n = match input.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_error(src, e)),
        };
        output
            .write_all(buf.get(..n).unwrap_or_default())
            .map_err(|e| io_error(dest, e))?;
    }
    output.flush().map_err(|e| io_error(dest, e))
}

/// Copies ownership, timestamps, and mode from `metadata` onto `dest`.
///
/// The mode goes last: changing ownership may clear set-uid and set-gid bits.
fn copy_metadata(metadata: &Metadata, dest: &Path) -> Result<()> {
    std::os::unix::fs::lchown(dest, Some(metadata.uid()), Some(metadata.gid()))
        .map_err(|e| io_error(dest, e))?;
    set_times(metadata, dest)?;
    if !metadata.file_type().is_symlink() {
        fs::set_permissions(dest, fs::Permissions::from_mode(metadata.mode() & 0o7777))
            .map_err(|e| io_error(dest, e))?;
    }
    Ok(())
}

fn set_times(metadata: &Metadata, dest: &Path) -> Result<()> {
    let accessed = metadata.accessed().map_err(|e| io_error(dest, e))?;
    let modified = metadata.modified().map_err(|e| io_error(dest, e))?;
    let times = FileTimes::new().set_accessed(accessed).set_modified(modified);
    File::open(dest)
        .and_then(|f| f.set_times(times))
        .map_err(|e| io_error(dest, e))
}

fn io_error(path: &Path, source: std::io::Error) -> EnterError {
    EnterError::Io {
        path: path.to_path_buf(),
        source,
    }
}
