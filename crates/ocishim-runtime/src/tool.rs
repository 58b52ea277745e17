//! Invocation of the external OCI runtime binary.
//!
//! Every call passes `--log <file>` first. Success is exit status zero;
//! anything else becomes [`ShimError::Invocation`] carrying the subcommand
//! and the captured output. Nothing is retried.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::sys::signal::Signal;
use ocishim_common::error::{Result, ShimError};
use ocishim_common::types::{ContainerId, ContainerState};
use ocishim_core::stdio::ChildStdio;
use serde::de::DeserializeOwned;

/// Handle on the runtime binary and its log file.
#[derive(Debug, Clone)]
pub struct RuntimeTool {
    binary: PathBuf,
    log: PathBuf,
}

impl RuntimeTool {
    /// Creates a handle, resolving a bare binary name on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a bare name cannot be found.
    pub fn new(binary: &Path, log: impl Into<PathBuf>) -> Result<Self> {
        let binary = if binary.components().count() == 1 && !binary.is_absolute() {
            which::which(binary).map_err(|e| ShimError::Config {
                message: format!("runtime {} not found on PATH: {e}", binary.display()),
            })?
        } else {
            binary.to_path_buf()
        };
        Ok(Self {
            binary,
            log: log.into(),
        })
    }

    /// Path of the runtime binary.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Path of the runtime log file.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        let _ = cmd.arg("--log").arg(&self.log);
        cmd
    }

    /// Runs subcommand `operation` with `args` and returns its combined output.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be launched or exits non-zero.
    pub fn output<S: AsRef<OsStr>>(
        &self,
        operation: &'static str,
        container: &str,
        args: &[S],
    ) -> Result<Vec<u8>> {
        tracing::debug!(op = operation, id = container, "invoking runtime");
        let out = self
            .command()
            .arg(operation)
            .args(args)
            .output()
            .map_err(|e| ShimError::io(&self.binary, e))?;

        let mut combined = out.stdout;
        combined.extend_from_slice(&out.stderr);
        if !out.status.success() {
            return Err(ShimError::Invocation {
                operation,
                container: container.to_owned(),
                detail: format!(
                    "{}: {}",
                    out.status,
                    String::from_utf8_lossy(&combined).trim()
                ),
            });
        }
        Ok(combined)
    }

    /// Runs a `create` or `exec` call with the process's stdio attached.
    ///
    /// Output is not captured: the runtime hands its own stdio to the
    /// container process, so the streams stay open after it exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be launched or exits non-zero.
    pub fn run_attached(
        &self,
        operation: &'static str,
        container: &ContainerId,
        args: &[OsString],
        stdio: ChildStdio,
    ) -> Result<()> {
        tracing::debug!(op = operation, id = %container, ?args, "invoking runtime");
        let mut cmd = self.command();
        let _ = cmd.arg(operation).args(args);
        stdio.apply(&mut cmd);
        let status = cmd.status().map_err(|e| ShimError::io(&self.binary, e))?;
        if !status.success() {
            return Err(ShimError::Invocation {
                operation,
                container: container.to_string(),
                detail: format!("{status}; see {}", self.log.display()),
            });
        }
        Ok(())
    }

    /// `start <id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails.
    pub fn start(&self, id: &ContainerId) -> Result<()> {
        self.output("start", id.as_str(), &[id.as_str()]).map(drop)
    }

    /// `kill <id> <signal>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails.
    pub fn kill(&self, id: &ContainerId, signal: Signal) -> Result<()> {
        let number = (signal as i32).to_string();
        self.output("kill", id.as_str(), &[id.as_str(), number.as_str()])
            .map(drop)
    }

    /// `pause <id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails.
    pub fn pause(&self, id: &ContainerId) -> Result<()> {
        self.output("pause", id.as_str(), &[id.as_str()]).map(drop)
    }

    /// `resume <id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails.
    pub fn resume(&self, id: &ContainerId) -> Result<()> {
        self.output("resume", id.as_str(), &[id.as_str()]).map(drop)
    }

    /// `delete <id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails.
    pub fn delete(&self, id: &ContainerId) -> Result<()> {
        self.output("delete", id.as_str(), &[id.as_str()]).map(drop)
    }

    /// `state <id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails or prints unexpected JSON.
    pub fn state(&self, id: &ContainerId) -> Result<ContainerState> {
        let out = self.output("state", id.as_str(), &[id.as_str()])?;
        parse_json(&out)
    }

    /// `list --format json`. Stopped but undeleted containers are included.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails or prints unexpected JSON.
    pub fn list(&self) -> Result<Vec<ContainerState>> {
        let out = self.output("list", "", &["--format", "json"])?;
        Ok(parse_json::<Option<Vec<ContainerState>>>(&out)?.unwrap_or_default())
    }

    /// `ps --format json <id>`: pids the runtime considers running.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails or prints unexpected JSON.
    pub fn running_pids(&self, id: &ContainerId) -> Result<Vec<u32>> {
        let out = self.output("ps", id.as_str(), &["--format", "json", id.as_str()])?;
        Ok(parse_json::<Option<Vec<u32>>>(&out)?.unwrap_or_default())
    }
}

fn parse_json<T: DeserializeOwned>(out: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(out)?)
}
