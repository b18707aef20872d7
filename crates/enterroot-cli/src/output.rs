//! Formatted output helpers for CLI commands.

use std::path::Path;

use enterroot_common::types::{RootKind, RootSource};
use serde::Serialize;

/// What `enterroot locate` reports about a root.
#[derive(Debug, Serialize)]
pub struct RootReport {
    /// The located root.
    #[serde(flatten)]
    pub root: RootSource,
    /// Size of the embedded or sibling image, for image roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_bytes: Option<u64>,
}

impl RootReport {
    /// Builds a report, measuring the image if the root is one.
    #[must_use]
    pub fn new(root: RootSource) -> Self {
        let image_bytes = match root.kind() {
            RootKind::Directory => None,
            RootKind::ImageFile { offset } => image_size(root.path(), offset),
        };
        Self { root, image_bytes }
    }

    /// Renders the report for a terminal.
    #[must_use]
    pub fn render(&self) -> String {
        match self.image_bytes {
            Some(bytes) => format!("{} ({})", self.root, format_bytes(bytes)),
            None => self.root.to_string(),
        }
    }
}

fn image_size(path: &Path, offset: u64) -> Option<u64> {
    let len = std::fs::metadata(path).ok()?.len();
    len.checked_sub(offset)
}

/// Formats a byte count into a human-readable string (e.g., "128 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
