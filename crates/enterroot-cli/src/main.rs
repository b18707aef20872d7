//! # enterroot: root switch for minimal inits
//!
//! Finds the real root filesystem (a directory, a sibling image, or an image
//! appended to this binary), mounts it under a persistent data directory,
//! pivots into it, and execs its `/usr/init`.
//!
//! When invoked as `enter-root` the binary is the re-executed half of a
//! `mount` and skips argument parsing entirely.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use std::ffi::OsString;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use enterroot_common::config::BootstrapEnv;
use enterroot_common::constants::REEXEC_NAME;
use enterroot_runtime::prepare::debug_enabled;
use tracing_subscriber::EnvFilter;

use crate::commands::{Cli, Command};

fn main() -> ExitCode {
    let argv: Vec<OsString> = std::env::args_os().collect();
    let env = BootstrapEnv::from_env().unwrap_or_default();

    let result = if invoked_as_reexec(&argv) {
        init_logging(env.debug);
        commands::enter::run(argv)
    } else {
        let cli = Cli::parse_from(argv);
        let debug = match &cli.command {
            Command::Mount(args) => debug_enabled(&env, args.debug_cmdline.as_deref()),
            _ => env.debug,
        };
        init_logging(debug);
        commands::execute(cli)
    };

    ExitCode::from(report(&result))
}

/// Logs a failed run once and turns it into the process exit status.
fn report(result: &anyhow::Result<()>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{e:#}");
            1
        }
    }
}

fn invoked_as_reexec(argv: &[OsString]) -> bool {
    argv.first()
        .and_then(|argv0| Path::new(argv0).file_name())
        .is_some_and(|name| name == REEXEC_NAME)
}

/// Logs to stderr; `RUST_LOG` wins over the debug switch.
fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn reexec_name_is_matched_on_basename() {
        assert!(invoked_as_reexec(&argv(&["enter-root"])));
        assert!(invoked_as_reexec(&argv(&["/proc/self/fd/3/enter-root", "--single"])));
        assert!(!invoked_as_reexec(&argv(&["enterroot", "mount"])));
        assert!(!invoked_as_reexec(&argv(&["/sbin/enter-root.bak"])));
        assert!(!invoked_as_reexec(&[]));
    }

    #[test]
    fn failures_map_to_exit_status_one() {
        assert_eq!(report(&Ok(())), 0);
        assert_eq!(report(&Err(anyhow::anyhow!("no root found"))), 1);
    }
}
