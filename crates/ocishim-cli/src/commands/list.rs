//! `oshim list` — List containers known to the runtime.

use clap::Args;

use super::GlobalArgs;
use crate::output;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print only container IDs.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if the runtime fails.
pub fn execute(args: ListArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    let containers = engine.list_containers()?;
    if args.quiet {
        for c in &containers {
            println!("{}", c.id);
        }
        return Ok(());
    }
    print!("{}", output::containers_table(&containers));
    Ok(())
}
