//! `enterroot mount`: Prepare the root and re-execute into new namespaces.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use enterroot_runtime::prepare::{self, MountOptions};

/// Arguments for the `mount` command.
#[derive(Args, Debug)]
pub struct MountArgs {
    /// Persistent data directory that becomes the new root.
    #[arg(long, env = enterroot_common::config::ENV_DATA)]
    pub data: PathBuf,

    /// Kernel command line word that enables debug logging.
    #[arg(long)]
    pub debug_cmdline: Option<String>,

    /// Arguments passed through to the final init.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

/// Executes the `mount` command.
///
/// Returns once the namespaced bootstrap has finished, or never when running
/// as PID 1.
///
/// # Errors
///
/// Returns an error if any step before or after the re-exec fails.
pub fn execute(args: MountArgs) -> anyhow::Result<()> {
    let options = MountOptions {
        data_dir: args.data,
        args: args.args,
        debug_cmdline: args.debug_cmdline,
    };
    prepare::mount(&options)
        .with_context(|| format!("failed to enter root on {}", options.data_dir.display()))
}
