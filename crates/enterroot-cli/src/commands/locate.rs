//! `enterroot locate`: Show the root that would be booted.

use clap::Args;
use enterroot_runtime::prepare;

use crate::output::RootReport;

/// Arguments for the `locate` command.
#[derive(Args, Debug)]
pub struct LocateArgs {
    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `locate` command.
///
/// # Errors
///
/// Returns an error if no root can be found.
pub fn execute(args: &LocateArgs) -> anyhow::Result<()> {
    let report = RootReport::new(prepare::locate()?);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}
