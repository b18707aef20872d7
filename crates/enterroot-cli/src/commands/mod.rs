//! CLI command definitions and dispatch.

pub mod enter;
pub mod locate;
pub mod mount;

use clap::{Parser, Subcommand};

/// enterroot: switch a booting system onto its real root filesystem.
#[derive(Parser, Debug)]
#[command(name = enterroot_common::constants::APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Locate and attach the root, then re-execute into new namespaces.
    Mount(mount::MountArgs),
    /// Run the root switch in the current namespaces and exec the final init.
    Enter(enter::EnterArgs),
    /// Show which root would be booted, without mounting anything.
    Locate(locate::LocateArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Mount(args) => mount::execute(args),
        Command::Enter(args) => enter::execute(args),
        Command::Locate(args) => locate::execute(&args),
    }
}
