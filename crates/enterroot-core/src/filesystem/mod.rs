//! Filesystem operations for the root switch.
//!
//! Provides bind and squashfs mounts, mount table queries, and the
//! `pivot_root`/`chroot` pair that makes the data directory the new `/`.

pub mod mount;
pub mod pivot_root;
