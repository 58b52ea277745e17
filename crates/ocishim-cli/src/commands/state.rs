//! `oshim state` — Print a container's runtime state.

use clap::Args;
use ocishim_common::types::ContainerId;

use super::GlobalArgs;

/// Arguments for the `state` command.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `state` command, printing pretty JSON.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails.
pub fn execute(args: StateArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    let state = engine.open_container(ContainerId::new(args.id))?.state()?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
