//! # enterroot-common
//!
//! Shared types, error definitions, the bootstrap environment channel, and
//! constants used across the enterroot workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and performs no syscalls beyond reading the process
//! environment.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
