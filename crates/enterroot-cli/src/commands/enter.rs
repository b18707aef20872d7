//! `enterroot enter`: Switch root in the current namespaces.
//!
//! This is what the re-executed `enter-root` process runs. The subcommand
//! exists for running the second half by hand from an already isolated shell.

use std::ffi::OsString;

use clap::Args;
use enterroot_common::constants::REEXEC_NAME;
use enterroot_runtime::prepare;

/// Arguments for the `enter` command.
#[derive(Args, Debug)]
pub struct EnterArgs {
    /// Arguments passed through to the final init.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

/// Executes the `enter` command.
///
/// # Errors
///
/// Returns an error if the root switch fails.
pub fn execute(args: EnterArgs) -> anyhow::Result<()> {
    let mut argv = Vec::with_capacity(args.args.len() + 1);
    argv.push(OsString::from(REEXEC_NAME));
    argv.extend(args.args);
    run(argv)
}

/// Runs the root switch with `argv` handed to the final init as is.
///
/// # Errors
///
/// Returns an error if the root switch fails.
pub fn run(argv: Vec<OsString>) -> anyhow::Result<()> {
    prepare::enter(argv)?;
    Ok(())
}
