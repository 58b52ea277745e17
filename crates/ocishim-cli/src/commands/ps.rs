//! `oshim ps` — List a container's processes.

use clap::Args;
use ocishim_common::types::ContainerId;

use super::GlobalArgs;
use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Container ID.
    pub id: String,

    /// Include zombies the supervisor created but the runtime no longer reports.
    #[arg(short, long)]
    pub all: bool,

    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, the runtime fails, or its
/// bookkeeping is corrupted.
pub fn execute(args: PsArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    let container = engine.open_container(ContainerId::new(args.id))?;
    let processes = if args.all {
        container.all_processes()?
    } else {
        container.running_processes()?
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&processes)?);
    } else {
        print!("{}", output::processes_table(&processes));
    }
    Ok(())
}
