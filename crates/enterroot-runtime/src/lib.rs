//! Root-switch orchestration for the enterroot bootstrap.
//!
//! [`prepare::mount`] runs before the namespace switch and hands over to
//! [`prepare::enter`], which drives the [`bootstrap::Bootstrap`] state
//! machine through a [`backend::BootBackend`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod bootstrap;
pub mod prepare;
