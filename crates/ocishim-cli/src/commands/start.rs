//! `oshim start` — Start a created container.

use clap::Args;
use ocishim_common::types::ContainerId;

use super::GlobalArgs;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails.
pub fn execute(args: StartArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    engine.open_container(ContainerId::new(args.id))?.start()?;
    Ok(())
}
