//! `oshim exec` — Run an additional process inside a container.

use std::path::PathBuf;

use clap::Args;
use ocishim_common::types::{ContainerId, StdioOptions};
use ocishim_runtime::bundle::ProcessSpec;
use ocishim_runtime::engine::Engine;

use super::GlobalArgs;
use crate::relay;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container ID.
    pub container: String,

    /// OCI process definition (JSON). Overrides the command and flags below.
    #[arg(short, long)]
    pub process: Option<PathBuf>,

    /// Allocate a terminal.
    #[arg(short, long)]
    pub tty: bool,

    /// Working directory inside the container.
    #[arg(long)]
    pub cwd: Option<String>,

    /// Environment variable as `KEY=value`; repeatable.
    #[arg(short, long)]
    pub env: Vec<String>,

    /// Command to execute.
    #[arg(trailing_var_arg = true, required_unless_present = "process")]
    pub command: Vec<String>,
}

impl ExecArgs {
    /// Builds the process definition from a file or from the flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition file cannot be loaded.
    pub fn process_spec(&self) -> anyhow::Result<ProcessSpec> {
        if let Some(path) = &self.process {
            return Ok(ProcessSpec::load(path)?);
        }
        let mut spec = ProcessSpec::new(self.command.clone());
        spec.terminal = self.tty;
        spec.env.clone_from(&self.env);
        if let Some(cwd) = &self.cwd {
            spec.cwd.clone_from(cwd);
        }
        Ok(spec)
    }
}

/// Executes the `exec` command, exiting with the process's status.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails.
pub fn execute(args: ExecArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let config = global.config()?;
    let engine = Engine::new(&config)?;
    let spec = args.process_spec()?;
    let container = engine.open_container(ContainerId::new(args.container))?;

    let mut process = container.exec_process(&spec, StdioOptions::all())?;
    let relays = relay::attach(process.stdio(), spec.terminal, config.console_timeout());
    let status = process.wait();
    relays.finish();
    let status = status?;
    process.delete()?;
    std::process::exit(status.shell_code());
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: ExecArgs,
    }

    #[test]
    fn flags_build_process_spec() {
        let w = Wrapper::try_parse_from([
            "exec", "c1", "-t", "--cwd", "/srv", "-e", "A=1", "ls", "-l",
        ])
        .unwrap();
        let spec = w.args.process_spec().unwrap();
        assert!(spec.terminal);
        assert_eq!(spec.args, vec!["ls", "-l"]);
        assert_eq!(spec.env, vec!["A=1"]);
        assert_eq!(spec.cwd, "/srv");
    }

    #[test]
    fn process_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("process.json");
        std::fs::write(&file, r#"{"args":["top"],"terminal":true}"#).unwrap();
        let w = Wrapper::try_parse_from(["exec", "c1", "--process", file.to_str().unwrap()])
            .unwrap();
        let spec = w.args.process_spec().unwrap();
        assert_eq!(spec.args, vec!["top"]);
        assert!(spec.terminal);
    }

    #[test]
    fn command_is_required_without_process_file() {
        assert!(Wrapper::try_parse_from(["exec", "c1"]).is_err());
    }
}
