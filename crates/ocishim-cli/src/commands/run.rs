//! `oshim run` — Create, start and attach to a container.

use std::path::PathBuf;

use clap::Args;
use nix::sys::signal::Signal;
use ocishim_common::types::{ContainerId, StdioOptions};
use ocishim_runtime::bundle::bundle_has_terminal;
use ocishim_runtime::engine::Engine;

use super::GlobalArgs;
use crate::relay;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container ID. A random one is generated if omitted.
    pub id: Option<String>,

    /// Path to the OCI bundle.
    #[arg(short, long, default_value = ".")]
    pub bundle: PathBuf,

    /// Keep the container after its init process exits.
    #[arg(long)]
    pub keep: bool,
}

/// Executes the `run` command.
///
/// Relays this terminal to the container until its init exits, forwarding
/// SIGINT, SIGTERM and SIGHUP as SIGTERM, then deletes the container and
/// exits with the init's status.
///
/// # Errors
///
/// Returns an error if any lifecycle step fails.
pub fn execute(args: RunArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let config = global.config()?;
    let engine = Engine::new(&config)?;
    let id = args.id.map_or_else(ContainerId::generate, ContainerId::new);
    let bundle = std::path::absolute(&args.bundle)?;
    let terminal = bundle_has_terminal(&bundle)?;

    let mut container = engine.create_container(id.clone(), &bundle, StdioOptions::all())?;
    let relays = relay::attach(container.stdio(), terminal, config.console_timeout());
    container.start()?;
    forward_termination(&engine, &id)?;

    let status = container.wait();
    relays.finish();
    let status = status?;
    tracing::info!(id = %id, %status, "init exited");

    if !args.keep {
        container.delete()?;
    }
    std::process::exit(status.shell_code());
}

fn forward_termination(engine: &Engine, id: &ContainerId) -> anyhow::Result<()> {
    let engine = engine.clone();
    let id = id.clone();
    ctrlc::set_handler(move || {
        let result = engine
            .open_container(id.clone())
            .and_then(|c| c.kill(Signal::SIGTERM));
        if let Err(e) = result {
            tracing::warn!(id = %id, error = %e, "failed to forward termination signal");
        }
    })?;
    Ok(())
}
