//! # enterroot-core
//!
//! Low-level Linux primitives for switching a boot process onto its real root.
//!
//! This crate provides safe abstractions over:
//! - **Root location**: environment override, sibling images, and images
//!   embedded in the running executable.
//! - **Loop devices**: attaching an image at an offset, auto-clear, detach.
//! - **Namespaces**: re-executing into fresh mount/PID/UTS/IPC namespaces.
//! - **Filesystem**: bind and squashfs mounts, mount table queries,
//!   `pivot_root`, and `chroot`.
//! - **Artifacts**: moving a live tree into persistent storage with its metadata.
//! - **Limits**: raising file descriptor and process limits.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cmdline;
pub mod filesystem;
pub mod locate;
pub mod loopdev;
pub mod migrate;
pub mod namespace;
pub mod rlimit;
pub mod squashfs;
