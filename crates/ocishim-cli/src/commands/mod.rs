//! CLI command definitions and dispatch.

pub mod create;
pub mod delete;
pub mod exec;
pub mod kill;
pub mod list;
pub mod pause;
pub mod ps;
pub mod resume;
pub mod run;
pub mod start;
pub mod state;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ocishim_common::config::ShimConfig;
use ocishim_common::constants::BIN_NAME;
use ocishim_runtime::engine::Engine;

/// oshim — supervise OCI containers through an external runtime.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Configuration sources, lowest precedence first: built-in defaults, the
/// `--config` file, then individual flags or their environment variables.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// JSON configuration file.
    #[arg(long, global = true, env = "OCISHIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// State root holding one directory per container.
    #[arg(long, global = true, env = "OCISHIM_ROOT")]
    pub root: Option<PathBuf>,

    /// OCI runtime binary, as a path or a name on PATH.
    #[arg(long, global = true, env = "OCISHIM_RUNTIME")]
    pub runtime: Option<PathBuf>,

    /// Log file passed to the runtime.
    #[arg(long, global = true, env = "OCISHIM_RUNTIME_LOG")]
    pub runtime_log: Option<PathBuf>,

    /// Give up waiting for a terminal master after this many milliseconds.
    #[arg(long, global = true, env = "OCISHIM_CONSOLE_TIMEOUT_MS")]
    pub console_timeout_ms: Option<u64>,

    /// Format of diagnostic output on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl GlobalArgs {
    /// Builds the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the merged
    /// result is invalid.
    pub fn config(&self) -> anyhow::Result<ShimConfig> {
        let mut config = match &self.config {
            Some(path) => ShimConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ShimConfig::default(),
        };
        if let Some(root) = &self.root {
            config.state_root.clone_from(root);
        }
        if let Some(runtime) = &self.runtime {
            config.runtime_path.clone_from(runtime);
        }
        if let Some(log) = &self.runtime_log {
            config.runtime_log.clone_from(log);
        }
        if self.console_timeout_ms.is_some() {
            config.console_timeout_ms = self.console_timeout_ms;
        }
        config.validate()?;
        Ok(config)
    }

    /// Opens an engine on the effective configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the state root
    /// cannot be prepared.
    pub fn engine(&self) -> anyhow::Result<Engine> {
        Ok(Engine::new(&self.config()?)?)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container from a bundle without starting it.
    Create(create::CreateArgs),
    /// Start the user process of a created container.
    Start(start::StartArgs),
    /// Create, start and attach to a container, then delete it on exit.
    Run(run::RunArgs),
    /// Run an additional process inside a running container.
    Exec(exec::ExecArgs),
    /// Send a signal to a container's init process.
    Kill(kill::KillArgs),
    /// Freeze every process in a container.
    Pause(pause::PauseArgs),
    /// Thaw a paused container.
    Resume(resume::ResumeArgs),
    /// Delete a container and its bookkeeping.
    Delete(delete::DeleteArgs),
    /// Print a container's runtime state as JSON.
    State(state::StateArgs),
    /// List containers known to the runtime.
    List(list::ListArgs),
    /// List a container's processes.
    Ps(ps::PsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let global = &cli.global;
    match cli.command {
        Command::Create(args) => create::execute(args, global),
        Command::Start(args) => start::execute(args, global),
        Command::Run(args) => run::execute(args, global),
        Command::Exec(args) => exec::execute(args, global),
        Command::Kill(args) => kill::execute(args, global),
        Command::Pause(args) => pause::execute(args, global),
        Command::Resume(args) => resume::execute(args, global),
        Command::Delete(args) => delete::execute(args, global),
        Command::State(args) => state::execute(args, global),
        Command::List(args) => list::execute(args, global),
        Command::Ps(args) => ps::execute(args, global),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.json");
        std::fs::write(
            &file,
            r#"{"state_root":"/from/file","runtime_path":"/usr/bin/crun"}"#,
        )
        .unwrap();

        let global = GlobalArgs {
            config: Some(file),
            root: Some("/from/flag".into()),
            console_timeout_ms: Some(500),
            ..GlobalArgs::default()
        };
        let config = global.config().unwrap();

        assert_eq!(config.state_root, PathBuf::from("/from/flag"));
        assert_eq!(config.runtime_path, PathBuf::from("/usr/bin/crun"));
        assert_eq!(config.console_timeout_ms, Some(500));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let global = GlobalArgs {
            console_timeout_ms: Some(0),
            ..GlobalArgs::default()
        };
        assert!(global.config().is_err());
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "oshim",
            "ps",
            "c1",
            "--all",
            "--root",
            "/tmp/state",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.global.root, Some(PathBuf::from("/tmp/state")));
        assert_eq!(cli.global.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Command::Ps(ref args) if args.all));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        let command = Cli::command();
        command.clone().debug_assert();
        assert_eq!(command.get_name(), "oshim");
    }
}
