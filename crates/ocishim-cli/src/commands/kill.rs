//! `oshim kill` — Signal a container's init process.

use std::str::FromStr;

use anyhow::anyhow;
use clap::Args;
use nix::sys::signal::Signal;
use ocishim_common::types::ContainerId;

use super::GlobalArgs;

/// Arguments for the `kill` command.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Container ID.
    pub id: String,

    /// Signal as a name (`TERM`, `SIGKILL`) or a number.
    #[arg(default_value = "SIGTERM", value_parser = parse_signal)]
    pub signal: Signal,
}

/// Executes the `kill` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails.
pub fn execute(args: KillArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let engine = global.engine()?;
    engine
        .open_container(ContainerId::new(args.id))?
        .kill(args.signal)?;
    Ok(())
}

/// Parses `SIGTERM`, `term`, `TERM` or `15`.
///
/// # Errors
///
/// Returns an error if the value names no signal.
pub fn parse_signal(raw: &str) -> anyhow::Result<Signal> {
    if let Ok(number) = raw.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| anyhow!("unknown signal number {number}"));
    }
    let upper = raw.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| anyhow!("unknown signal {raw:?}"))
}
