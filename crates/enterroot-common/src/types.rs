//! Domain primitive types used across the enterroot workspace.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What kind of object backs the real root filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RootKind {
    /// A plain directory, bind-mounted as-is.
    Directory,
    /// A file holding a squashfs image starting at `offset`.
    ImageFile {
        /// Byte offset of the image within the file.
        offset: u64,
    },
}

/// The located root filesystem for this boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSource {
    path: PathBuf,
    #[serde(flatten)]
    kind: RootKind,
}

impl RootSource {
    /// Creates a root source from its path and kind.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: RootKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the path of the directory or backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the root kind.
    #[must_use]
    pub const fn kind(&self) -> RootKind {
        self.kind
    }

    /// Returns the image offset, or `None` for a directory root.
    #[must_use]
    pub const fn image_offset(&self) -> Option<u64> {
        match self.kind {
            RootKind::Directory => None,
            RootKind::ImageFile { offset } => Some(offset),
        }
    }
}

impl fmt::Display for RootSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RootKind::Directory => write!(f, "directory {}", self.path.display()),
            RootKind::ImageFile { offset } => {
                write!(f, "image {} at offset {offset}", self.path.display())
            }
        }
    }
}

/// Stage of the root-switch sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootStage {
    /// Nothing done yet.
    Init,
    /// The data directory exists and is a mount point.
    DataBound,
    /// The root source is known.
    RootResolved,
    /// The root image is attached to a loop device.
    LoopAttached,
    /// The root is mounted on `<data>/usr`.
    UsrMounted,
    /// Compatibility symlinks exist.
    SymlinksReady,
    /// Early artifacts were migrated (or the attempt was logged).
    ArtifactsMigrated,
    /// `pivot_root` succeeded.
    PivotDone,
    /// The new root is private and the process is chrooted into it.
    Chrooted,
    /// Control is being handed to the final init.
    Exec,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::DataBound => "data-bound",
            Self::RootResolved => "root-resolved",
            Self::LoopAttached => "loop-attached",
            Self::UsrMounted => "usr-mounted",
            Self::SymlinksReady => "symlinks-ready",
            Self::ArtifactsMigrated => "artifacts-migrated",
            Self::PivotDone => "pivot-done",
            Self::Chrooted => "chrooted",
            Self::Exec => "exec",
        };
        f.write_str(name)
    }
}
