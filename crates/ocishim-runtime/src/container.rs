//! Container handle and its lifecycle operations.

use std::ffi::OsString;
use std::sync::Arc;

use nix::sys::signal::Signal;
use ocishim_common::constants::PROCESS_SPEC_FILENAME;
use ocishim_common::error::{Result, ShimError};
use ocishim_common::types::{ContainerId, ContainerState, ExitStatus, ProcessState, StdioOptions};
use ocishim_core::stdio::SharedStdio;

use crate::bundle::ProcessSpec;
use crate::engine::Shared;
use crate::process::{self, Launch, Process, wait_on_process};
use crate::reconcile;

/// A container and its init process.
#[derive(Debug)]
pub struct Container {
    init: Process,
}

impl Container {
    pub(crate) const fn new(init: Process) -> Self {
        Self { init }
    }

    fn shared(&self) -> &Arc<Shared> {
        self.init.shared()
    }

    /// Container id.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        self.init.container_id()
    }

    /// The init process.
    #[must_use]
    pub const fn init(&self) -> &Process {
        &self.init
    }

    /// Pid of the init process.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.init.pid()
    }

    /// Stdio of the init process.
    #[must_use]
    pub const fn stdio(&self) -> &SharedStdio {
        self.init.stdio()
    }

    /// Whether the runtime still knows this container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime's list cannot be obtained.
    pub fn exists(&self) -> Result<bool> {
        let id = self.id();
        Ok(self.shared().tool.list()?.iter().any(|s| &s.id == id))
    }

    /// Starts the user process of a created container.
    ///
    /// If the runtime refuses, the container's bookkeeping is removed before
    /// the error returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the init process is not started or the runtime fails.
    pub fn start(&self) -> Result<()> {
        self.init.require_started("start")?;
        let id = self.id();
        if let Err(e) = self.shared().tool.start(id) {
            if let Err(cleanup) = self.shared().layout.remove_container(id) {
                tracing::warn!(id = %id, error = %cleanup, "failed to remove container directory after failed start");
            }
            tracing::warn!(id = %id, error = %e, "container start failed");
            return Err(e);
        }
        tracing::info!(id = %id, pid = self.pid(), "container started");
        Ok(())
    }

    /// Runs an additional process inside the container.
    ///
    /// The process definition is written as `process.json` next to the
    /// pending pid file and passed with `exec -d --process`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not started, the definition
    /// cannot be written, or the runtime fails.
    pub fn exec_process(&self, spec: &ProcessSpec, stdio: StdioOptions) -> Result<Process> {
        self.init.require_started("exec")?;
        let id = self.id();
        let pending = self.shared().layout.allocate_pending(id)?;
        let spec_path = pending.path().join(PROCESS_SPEC_FILENAME);
        let raw = serde_json::to_vec(spec)?;
        std::fs::write(&spec_path, raw).map_err(|e| ShimError::io(&spec_path, e))?;

        let args: Vec<OsString> = vec!["-d".into(), "--process".into(), spec_path.into_os_string()];
        let process = process::launch(
            self.shared(),
            id,
            pending,
            Launch {
                operation: "exec",
                args,
                terminal: spec.terminal,
                stdio,
            },
        )?;
        tracing::info!(id = %id, pid = process.pid(), args = ?spec.args, "exec process started");
        Ok(process)
    }

    /// Sends `signal` to the init process through the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not started or the runtime fails.
    pub fn kill(&self, signal: Signal) -> Result<()> {
        self.init.require_started("kill")?;
        self.shared().tool.kill(self.id(), signal)?;
        tracing::info!(id = %self.id(), signal = signal.as_str(), "container signalled");
        Ok(())
    }

    /// Freezes every process in the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not started or the runtime fails.
    pub fn pause(&self) -> Result<()> {
        self.init.require_started("pause")?;
        self.shared().tool.pause(self.id())?;
        tracing::info!(id = %self.id(), "container paused");
        Ok(())
    }

    /// Thaws a paused container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is not started or the runtime fails.
    pub fn resume(&self) -> Result<()> {
        self.init.require_started("resume")?;
        self.shared().tool.resume(self.id())?;
        tracing::info!(id = %self.id(), "container resumed");
        Ok(())
    }

    /// The runtime's state document for this container.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails.
    pub fn state(&self) -> Result<ContainerState> {
        self.shared().tool.state(self.id())
    }

    /// Processes the runtime reports as running, classified by origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails, the container directory is
    /// corrupted, or a process vanishes while being inspected.
    pub fn running_processes(&self) -> Result<Vec<ProcessState>> {
        let shared = self.shared();
        let id = self.id();
        let running = shared.tool.running_pids(id)?;
        let entries = shared.layout.process_entries(id)?;
        reconcile::running_processes(
            &running,
            &shared.layout.container_dir(id),
            &entries,
            &shared.procfs,
        )
    }

    /// Running processes plus supervisor-created zombies.
    ///
    /// # Errors
    ///
    /// Same as [`Container::running_processes`].
    pub fn all_processes(&self) -> Result<Vec<ProcessState>> {
        let shared = self.shared();
        let id = self.id();
        let running = shared.tool.running_pids(id)?;
        let entries = shared.layout.process_entries(id)?;
        reconcile::all_processes(
            &running,
            &shared.layout.container_dir(id),
            &entries,
            &shared.procfs,
        )
    }

    /// Reaps every exec'd process, then waits for init.
    ///
    /// Wait failures on exec'd processes are ignored, since they may
    /// already have been reaped. A runtime that no longer lists the
    /// container is tolerated too; its exec'd processes are then left to
    /// the subreaper.
    ///
    /// # Errors
    ///
    /// Returns an error if the container directory is corrupted, a process
    /// cannot be inspected, or waiting on the init process fails.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.init.require_started("wait")?;
        let init_pid = self.pid();
        let states = match self.all_processes() {
            Ok(states) => states,
            Err(e @ ShimError::Invocation { .. }) => {
                tracing::warn!(id = %self.id(), error = %e, "runtime did not list processes before waiting on init");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        for state in states
            .iter()
            .filter(|s| s.created_by_runtime && s.pid != init_pid)
        {
            match wait_on_process(state.pid) {
                Ok(status) => tracing::debug!(id = %self.id(), %status, "reaped exec process"),
                Err(e) => tracing::debug!(id = %self.id(), pid = state.pid, error = %e, "ignoring exec process wait failure"),
            }
        }
        self.init.wait()
    }

    /// Deletes the container from the runtime and removes its bookkeeping.
    ///
    /// The directory is removed even if the runtime's delete fails; that
    /// failure is still returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns the runtime's error, or an error if the directory cannot be
    /// removed.
    pub fn delete(&mut self) -> Result<()> {
        let id = self.id().clone();
        let tool_result = self.shared().tool.delete(&id);
        if let Err(e) = &tool_result {
            tracing::warn!(id = %id, error = %e, "runtime delete failed, removing bookkeeping anyway");
        }
        self.init.stdio().close();
        self.shared().layout.remove_container(&id)?;
        self.init.mark_deleted();
        tracing::info!(id = %id, "container deleted");
        tool_result
    }
}
