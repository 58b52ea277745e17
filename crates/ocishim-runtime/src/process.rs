//! Launching container processes and tracking their lifecycle.
//!
//! A process moves `pending -> started -> exited -> deleted`. Pending is
//! represented by a [`PendingProcessDir`] rather than a [`Process`]: a handle
//! only exists once the runtime has reported a pid and the directory has
//! been published under it.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use ocishim_common::error::{Result, ShimError};
use ocishim_common::types::{ContainerId, ExitStatus, ProcessPhase, StdioOptions};
use ocishim_core::console::{ConsoleMaster, ConsoleReceiver, ConsoleSocket};
use ocishim_core::stdio::{ChildStdio, SharedStdio, StdioPipes, pipes_without_terminal};

use crate::engine::Shared;
use crate::layout::PendingProcessDir;

/// A process the supervisor launched or reattached to.
#[derive(Debug)]
pub struct Process {
    shared: Arc<Shared>,
    container: ContainerId,
    pid: u32,
    phase: ProcessPhase,
    stdio: SharedStdio,
}

impl Process {
    /// A handle on an already started process whose stdio is held elsewhere.
    pub(crate) fn attach(shared: Arc<Shared>, container: ContainerId, pid: u32) -> Self {
        Self {
            shared,
            container,
            pid,
            phase: ProcessPhase::Started,
            stdio: SharedStdio::with_pipes(StdioPipes::default()),
        }
    }

    /// OS process id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Owning container.
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        &self.container
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> ProcessPhase {
        self.phase
    }

    /// Supervisor-side stdio handles.
    #[must_use]
    pub const fn stdio(&self) -> &SharedStdio {
        &self.stdio
    }

    pub(crate) const fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn require_started(&self, operation: &'static str) -> Result<()> {
        if self.phase == ProcessPhase::Started {
            Ok(())
        } else {
            Err(ShimError::InvalidState {
                operation,
                state: self.phase,
            })
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.phase = ProcessPhase::Deleted;
    }

    /// Blocks until the process terminates.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is not started or `waitpid` fails.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.require_started("wait")?;
        let status = wait_on_process(self.pid)?;
        self.phase = ProcessPhase::Exited;
        tracing::info!(id = %self.container, pid = self.pid, %status, "process exited");
        Ok(status)
    }

    /// Removes the process's directory and closes its stdio.
    ///
    /// Deleting twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn delete(&mut self) -> Result<()> {
        self.stdio.close();
        self.shared.layout.remove_process(&self.container, self.pid)?;
        self.phase = ProcessPhase::Deleted;
        tracing::info!(id = %self.container, pid = self.pid, "process deleted");
        Ok(())
    }
}

/// Waits for `pid` to terminate and reaps it.
///
/// Only children (including orphans reparented to this subreaper) can be
/// waited on. Interrupted waits are retried.
///
/// # Errors
///
/// Returns [`ShimError::Wait`] if `waitpid` fails.
pub fn wait_on_process(pid: u32) -> Result<ExitStatus> {
    let target = i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| ShimError::Wait {
            pid,
            source: Errno::EINVAL,
        })?;
    loop {
        match waitpid(target, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus {
                    pid,
                    code: Some(code),
                    signal: None,
                });
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ExitStatus {
                    pid,
                    code: None,
                    signal: Some(signal as i32),
                });
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(source) => return Err(ShimError::Wait { pid, source }),
        }
    }
}

/// What to ask the runtime for.
#[derive(Debug)]
pub(crate) struct Launch {
    /// `create` or `exec`.
    pub(crate) operation: &'static str,
    /// Subcommand arguments preceding the pid file, console socket and id.
    pub(crate) args: Vec<OsString>,
    pub(crate) terminal: bool,
    pub(crate) stdio: StdioOptions,
}

/// Runs a `create` or `exec` and publishes the resulting process.
///
/// For a terminal the console receiver is started before the runtime is
/// invoked, since the runtime connects to it during the call. If the call
/// fails the receiver is abandoned, stdio is closed and `pending` is
/// removed when dropped.
pub(crate) fn launch(
    shared: &Arc<Shared>,
    id: &ContainerId,
    pending: PendingProcessDir,
    request: Launch,
) -> Result<Process> {
    let Launch {
        operation,
        mut args,
        terminal,
        stdio: options,
    } = request;

    nix::sys::prctl::set_child_subreaper(true)
        .map_err(|e| ShimError::sys("prctl(PR_SET_CHILD_SUBREAPER)", e))?;

    args.push("--pid-file".into());
    args.push(pending.pid_file().into_os_string());

    let (child, stdio, console): (_, _, Option<(ConsoleReceiver, PathBuf)>) = if terminal {
        let socket = ConsoleSocket::open(pending.path())?;
        let socket_path = socket.path().to_path_buf();
        args.push("--console-socket".into());
        args.push(socket_path.clone().into_os_string());

        let stdio = SharedStdio::awaiting_pty();
        let sink = stdio.clone();
        let receiver = socket.spawn_receiver(shared.console_timeout, move |master| {
            sink.settle_pty(master.map(ConsoleMaster::into_file));
        })?;
        (ChildStdio::null(), stdio, Some((receiver, socket_path)))
    } else {
        let (child, pipes) = pipes_without_terminal(options)?;
        (child, SharedStdio::with_pipes(pipes), None)
    };
    args.push(id.as_str().into());

    if let Err(e) = shared.tool.run_attached(operation, id, &args, child) {
        if let Some((receiver, _)) = console {
            receiver.abandon();
            receiver.join();
        }
        stdio.close();
        tracing::warn!(id = %id, op = operation, phase = %ProcessPhase::Failed, error = %e, "process launch failed");
        return Err(e);
    }

    if let Some((_, socket_path)) = console {
        if let Err(e) = std::fs::remove_file(&socket_path) {
            tracing::debug!(path = %socket_path.display(), error = %e, "console socket already gone");
        }
    }

    let pid = pending.read_pid()?;
    let published = pending.publish(&shared.layout.container_dir(id), pid)?;
    tracing::info!(id = %id, pid, op = operation, dir = %published.display(), "process started");

    Ok(Process {
        shared: Arc::clone(shared),
        container: id.clone(),
        pid,
        phase: ProcessPhase::Started,
        stdio,
    })
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use super::*;

    #[test]
    fn wait_reports_exit_code() {
        let child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let status = wait_on_process(child.id()).unwrap();
        assert_eq!(status.code, Some(3));
        assert_eq!(status.signal, None);
        assert!(!status.success());
    }

    #[test]
    fn wait_reports_terminating_signal() {
        let child = Command::new("sh").args(["-c", "kill -9 $$"]).spawn().unwrap();
        let status = wait_on_process(child.id()).unwrap();
        assert_eq!(status.code, None);
        assert_eq!(status.signal, Some(nix::sys::signal::Signal::SIGKILL as i32));
    }

    #[test]
    fn waiting_on_a_stranger_is_a_wait_error() {
        assert!(matches!(
            wait_on_process(1),
            Err(ShimError::Wait { pid: 1, .. })
        ));
    }
}
