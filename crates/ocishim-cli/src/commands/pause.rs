//! `oshim pause` — Freeze a container.

use clap::Args;
use ocishim_common::types::ContainerId;

use super::GlobalArgs;

/// Arguments for the `pause` command.
#[derive(Args, Debug)]
pub struct PauseArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `pause` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails.
pub fn execute(args: PauseArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    engine.open_container(ContainerId::new(args.id))?.pause()?;
    Ok(())
}
