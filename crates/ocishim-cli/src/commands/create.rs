//! `oshim create` — Create a container without starting it.

use std::path::PathBuf;

use clap::Args;
use ocishim_common::types::{ContainerId, StdioOptions};

use super::GlobalArgs;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Container ID.
    pub id: String,

    /// Path to the OCI bundle.
    #[arg(short, long, default_value = ".")]
    pub bundle: PathBuf,
}

/// Executes the `create` command and prints the init pid.
///
/// The container's streams go to the null device; use `run` to attach.
///
/// # Errors
///
/// Returns an error if the bundle cannot be read or the runtime fails.
pub fn execute(args: CreateArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    let bundle = std::path::absolute(&args.bundle)?;
    let container =
        engine.create_container(ContainerId::new(args.id), &bundle, StdioOptions::default())?;
    println!("{}", container.pid());
    Ok(())
}
