//! `oshim delete` — Delete a container and its bookkeeping.

use clap::Args;
use ocishim_common::types::ContainerId;

use super::GlobalArgs;

/// Arguments for the `delete` command.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Container ID.
    pub id: String,
}

/// Executes the `delete` command.
///
/// The container's directory under the state root is removed even when
/// the runtime refuses; the runtime's error is still reported.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails.
pub fn execute(args: DeleteArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    let mut container = engine.open_container(ContainerId::new(args.id))?;
    container.delete()?;
    Ok(())
}
