//! Root filesystem discovery.
//!
//! The root is resolved in a fixed order, first match wins:
//!
//! 1. the `ENTER_ROOT` environment override, at offset 0;
//! 2. a sibling of the executable named `<argv0>.root` or `<argv0>.squashfs`;
//! 3. an image appended to the running executable after [`IMAGE_MAGIC`].

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;

use enterroot_common::config::BootstrapEnv;
use enterroot_common::constants::{IMAGE_MAGIC, ROOT_SUFFIXES, SCAN_CHUNK_SIZE, SELF_EXE};
use enterroot_common::error::{EnterError, Result};
use enterroot_common::types::{RootKind, RootSource};

/// Finds the root filesystem for this boot.
#[derive(Debug, Clone)]
pub struct RootLocator {
    env_root: Option<PathBuf>,
    argv0: PathBuf,
    executable: PathBuf,
}

impl RootLocator {
    /// Creates a locator from explicit inputs.
    ///
    /// `argv0` is the name the process was invoked as (used for sibling
    /// images), `executable` the file scanned for an embedded image.
    #[must_use]
    pub fn new(env_root: Option<PathBuf>, argv0: PathBuf, executable: PathBuf) -> Self {
        Self {
            env_root,
            argv0,
            executable,
        }
    }

    /// Creates a locator for the running process.
    ///
    /// # Errors
    ///
    /// Returns an error if the path of the running executable is unavailable.
    pub fn for_current_process(env: &BootstrapEnv) -> Result<Self> {
        let argv0 = std::env::args_os().next().map(PathBuf::from).unwrap_or_default();
        let executable = std::env::current_exe().map_err(|e| EnterError::Io {
            path: SELF_EXE.into(),
            source: e,
        })?;
        Ok(Self::new(env.root.clone(), argv0, executable))
    }

    /// Returns the root path and image offset without inspecting the result.
    ///
    /// # Errors
    ///
    /// Returns [`EnterError::ImageNotFound`] if no override or sibling exists
    /// and the executable carries no embedded image, or an I/O error if the
    /// executable cannot be read.
    pub fn locate(&self) -> Result<(PathBuf, u64)> {
        if let Some(root) = &self.env_root {
            return Ok((root.clone(), 0));
        }

        for suffix in ROOT_SUFFIXES {
            let mut candidate = self.argv0.clone().into_os_string();
            candidate.push(suffix);
            let candidate = PathBuf::from(candidate);
            if candidate.exists() {
                return Ok((candidate, 0));
            }
        }

        self.embedded()
    }

    /// Locates the root and classifies it as a directory or image file.
    ///
    /// # Errors
    ///
    /// Returns an error if [`locate`](Self::locate) fails or the located
    /// path cannot be stat'ed.
    pub fn find(&self) -> Result<RootSource> {
        let (path, offset) = self.locate()?;
        let metadata = std::fs::metadata(&path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "root stat failed");
            EnterError::NotFound {
                kind: "root",
                path: path.clone(),
            }
        })?;
        let kind = if metadata.is_dir() {
            RootKind::Directory
        } else {
            RootKind::ImageFile { offset }
        };
        let source = RootSource::new(path, kind);
        tracing::debug!(root = %source, "root located");
        Ok(source)
    }

    fn embedded(&self) -> Result<(PathBuf, u64)> {
        let file = File::open(&self.executable).map_err(|e| EnterError::Io {
            path: self.executable.clone(),
            source: e,
        })?;
        let magic = IMAGE_MAGIC.to_ascii_lowercase();
        let found = scan_for_magic(file, magic.as_bytes(), SCAN_CHUNK_SIZE).map_err(|e| {
            EnterError::Io {
                path: self.executable.clone(),
                source: e,
            }
        })?;
        match found {
            Some(offset) => Ok((self.executable.clone(), offset)),
            None => Err(EnterError::ImageNotFound {
                path: self.argv0.clone(),
            }),
        }
    }
}

/// Scans `reader` for `magic` and returns the offset just past its last byte.
///
/// Reads in chunks of `chunk_size`; a match may straddle chunks. The matcher
/// does not backtrack: on a mismatch the match count drops to zero and the
/// mismatched byte is not re-tested as a possible first byte. A token whose
/// prefix repeats (or a stray copy of its first byte immediately before the
/// real token) is therefore missed. The embedded image format relies on this
/// exact behaviour, so it is kept as is.
///
/// # Errors
///
/// Returns any read error other than [`ErrorKind::Interrupted`].
pub fn scan_for_magic<R: Read>(
    mut reader: R,
    magic: &[u8],
    chunk_size: usize,
) -> std::io::Result<Option<u64>> {
    if magic.is_empty() {
        return Ok(Some(0));
    }

    let mut buf = vec![0_u8; chunk_size.max(1)];
    let mut offset = 0_u64;
    let mut matched = 0_usize;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        for &byte in buf.iter().take(n) {
            if magic.get(matched) == Some(&byte) {
                matched += 1;
                if matched == magic.len() {
                    return Ok(Some(offset + 1));
                }
            } else {
                matched = 0;
            }
            offset += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &[u8] = b"_sqmagic_";

    fn image_with_token_at(start: usize) -> Vec<u8> {
        let mut data = vec![0x7f_u8; start];
        data.extend_from_slice(TOKEN);
        data.extend_from_slice(b"hsqs-image-bytes");
        data
    }

    #[test]
    fn scan_returns_offset_past_last_magic_byte() {
        let data = image_with_token_at(100);
        let offset = scan_for_magic(data.as_slice(), TOKEN, 8192).unwrap();
        assert_eq!(offset, Some(100 + 9));
        assert_eq!(&data[109..113], b"hsqs");
    }

    #[test]
    fn scan_finds_token_split_across_chunks() {
        for chunk in [1, 2, 4, 5, 7, 8, 16] {
            for start in [0, 3, 6, 13, 60] {
                let data = image_with_token_at(start);
                let offset = scan_for_magic(data.as_slice(), TOKEN, chunk).unwrap();
                assert_eq!(offset, Some((start + TOKEN.len()) as u64), "chunk {chunk} start {start}");
            }
        }
    }

    #[test]
    fn scan_without_token_returns_none() {
        let data = vec![0_u8; 20_000];
        assert_eq!(scan_for_magic(data.as_slice(), TOKEN, 8192).unwrap(), None);
    }

    #[test]
    fn scan_does_not_retest_the_mismatched_byte() {
        let mut data = b"__sqmagic_".to_vec();
        data.extend_from_slice(b"rest");
        assert_eq!(scan_for_magic(data.as_slice(), TOKEN, 8192).unwrap(), None);
    }

    #[test]
    fn scan_ignores_uppercase_marker() {
        let data = b"xx_SQMAGIC_yy".to_vec();
        assert_eq!(scan_for_magic(data.as_slice(), TOKEN, 8192).unwrap(), None);
    }

    #[test]
    fn env_root_is_returned_verbatim_without_scanning() {
        let locator = RootLocator::new(
            Some(PathBuf::from("/custom/root dir")),
            PathBuf::from("/nonexistent/argv0"),
            PathBuf::from("/nonexistent/exe"),
        );
        let (path, offset) = locator.locate().unwrap();
        assert_eq!(path, PathBuf::from("/custom/root dir"));
        assert_eq!(offset, 0);
    }

    #[test]
    fn sibling_root_file_is_preferred_over_scan() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let argv0 = dir.path().join("init");
        std::fs::write(dir.path().join("init.squashfs"), b"hsqs").expect("write failed");
        let locator = RootLocator::new(None, argv0, dir.path().join("missing-exe"));

        let source = locator.find().unwrap();
        assert_eq!(source.path(), dir.path().join("init.squashfs"));
        assert_eq!(source.kind(), RootKind::ImageFile { offset: 0 });
    }

    #[test]
    fn dot_root_suffix_wins_over_squashfs() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let argv0 = dir.path().join("init");
        std::fs::create_dir(dir.path().join("init.root")).expect("mkdir failed");
        std::fs::write(dir.path().join("init.squashfs"), b"hsqs").expect("write failed");
        let locator = RootLocator::new(None, argv0, dir.path().join("missing-exe"));

        let source = locator.find().unwrap();
        assert_eq!(source.path(), dir.path().join("init.root"));
        assert_eq!(source.kind(), RootKind::Directory);
    }

    #[test]
    fn embedded_image_is_found_in_executable() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let exe = dir.path().join("enterroot");
        let mut data = vec![0_u8; 10_000];
        data.extend_from_slice(TOKEN);
        data.extend_from_slice(b"hsqs");
        std::fs::write(&exe, &data).expect("write failed");
        let locator = RootLocator::new(None, exe.clone(), exe.clone());

        let source = locator.find().unwrap();
        assert_eq!(source.path(), exe);
        assert_eq!(source.image_offset(), Some(10_009));
    }

    #[test]
    fn missing_image_is_reported_against_argv0() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let exe = dir.path().join("plain");
        std::fs::write(&exe, b"no image here").expect("write failed");
        let locator = RootLocator::new(None, exe.clone(), exe.clone());

        let err = locator.find().unwrap_err();
        assert!(matches!(err, EnterError::ImageNotFound { .. }));
        assert!(err.to_string().starts_with("failed to find image in file"));
    }

    #[test]
    fn find_reports_missing_override() {
        let locator = RootLocator::new(
            Some(PathBuf::from("/definitely/not/here")),
            PathBuf::new(),
            PathBuf::new(),
        );
        let err = locator.find().unwrap_err();
        assert!(matches!(err, EnterError::NotFound { kind: "root", .. }));
    }
}
