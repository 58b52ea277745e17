//! `oshim resume` — Thaw a paused container.

use clap::Args;
use ocishim_common::types::ContainerId;

use super::GlobalArgs;

/// Arguments for the `resume` command.
#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `resume` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails.
pub fn execute(args: ResumeArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    engine.open_container(ContainerId::new(args.id))?.resume()?;
    Ok(())
}
