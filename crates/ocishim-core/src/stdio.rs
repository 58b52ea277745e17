//! Standard stream plumbing for container processes.
//!
//! Non-terminal processes get one pipe pair per requested stream: the
//! child-facing ends go to the runtime invocation, the supervisor-facing
//! ends come back as a [`StdioPipes`]. Terminal processes get a single
//! pty master, delivered later by the console receiver.

use std::fs::File;
use std::os::fd::OwnedFd;
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use nix::fcntl::OFlag;
use ocishim_common::error::{Result, ShimError};
use ocishim_common::types::StdioOptions;

/// Supervisor-side ends of a process's standard streams.
///
/// Each member is closed at most once: closing takes it out of its slot.
#[derive(Debug, Default)]
pub struct StdioPipes {
    /// Writer feeding the process's stdin.
    pub stdin: Option<File>,
    /// Reader draining the process's stdout.
    pub stdout: Option<File>,
    /// Reader draining the process's stderr.
    pub stderr: Option<File>,
    /// Read-write terminal master.
    pub pty: Option<File>,
}

impl StdioPipes {
    /// Closes every open member. Calling it again is a no-op.
    pub fn close(&mut self) {
        drop(self.stdin.take());
        drop(self.stdout.take());
        drop(self.stderr.take());
        drop(self.pty.take());
    }

    /// Returns true if no member is open.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none() && self.stderr.is_none() && self.pty.is_none()
    }
}

/// Child-facing ends handed to the runtime invocation.
#[derive(Debug)]
pub struct ChildStdio {
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
}

impl ChildStdio {
    /// All three streams connected to the null device.
    #[must_use]
    pub fn null() -> Self {
        Self {
            stdin: Stdio::null(),
            stdout: Stdio::null(),
            stderr: Stdio::null(),
        }
    }

    /// Wires the streams into `cmd`.
    pub fn apply(self, cmd: &mut Command) {
        let _ = cmd.stdin(self.stdin).stdout(self.stdout).stderr(self.stderr);
    }
}

/// Creates the pipe pairs requested by `options`.
///
/// Unrequested streams are connected to the null device.
///
/// # Errors
///
/// Returns an error if a pipe cannot be created. Pipes created before the
/// failure are closed.
pub fn pipes_without_terminal(options: StdioOptions) -> Result<(ChildStdio, StdioPipes)> {
    let mut child = ChildStdio::null();
    let mut pipes = StdioPipes::default();

    if options.create_in {
        let (read, write) = pipe()?;
        child.stdin = Stdio::from(read);
        pipes.stdin = Some(File::from(write));
    }
    if options.create_out {
        let (read, write) = pipe()?;
        child.stdout = Stdio::from(write);
        pipes.stdout = Some(File::from(read));
    }
    if options.create_err {
        let (read, write) = pipe()?;
        child.stderr = Stdio::from(write);
        pipes.stderr = Some(File::from(read));
    }
    Ok((child, pipes))
}

fn pipe() -> Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| ShimError::sys("pipe2", e))
}

#[derive(Debug, Default)]
struct Slots {
    pipes: StdioPipes,
    pty_settled: bool,
}

/// A process's stdio handles, shared with the console receiver.
///
/// The receiver fills in the pty after the create or exec call has already
/// returned, so callers that need it use [`SharedStdio::wait_for_pty`].
#[derive(Debug, Clone, Default)]
pub struct SharedStdio {
    inner: Arc<(Mutex<Slots>, Condvar)>,
}

impl SharedStdio {
    /// Wraps pipes for a process that will never have a pty.
    #[must_use]
    pub fn with_pipes(pipes: StdioPipes) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Slots {
                    pipes,
                    pty_settled: true,
                }),
                Condvar::new(),
            )),
        }
    }

    /// An empty set awaiting a pty from the console receiver.
    #[must_use]
    pub fn awaiting_pty() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the outcome of the console receive and wakes waiters.
    pub fn settle_pty(&self, pty: Option<File>) {
        let mut slots = self.slots();
        slots.pipes.pty = pty;
        slots.pty_settled = true;
        drop(slots);
        self.inner.1.notify_all();
    }

    /// Waits until the pty has been received or its receive has failed.
    ///
    /// Returns `None` on failure, on timeout, or if it was already taken.
    pub fn wait_for_pty(&self, timeout: Option<Duration>) -> Option<File> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slots = self.slots();
        while !slots.pty_settled {
            slots = match deadline {
                None => self
                    .inner
                    .1
                    .wait(slots)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return None;
                    }
                    self.inner
                        .1
                        .wait_timeout(slots, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        slots.pipes.pty.take()
    }

    /// Takes the stdin writer, if present.
    pub fn take_stdin(&self) -> Option<File> {
        self.slots().pipes.stdin.take()
    }

    /// Takes the stdout reader, if present.
    pub fn take_stdout(&self) -> Option<File> {
        self.slots().pipes.stdout.take()
    }

    /// Takes the stderr reader, if present.
    pub fn take_stderr(&self) -> Option<File> {
        self.slots().pipes.stderr.take()
    }

    /// Closes every member still held. Idempotent.
    pub fn close(&self) {
        self.slots().pipes.close();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn close_twice_is_a_noop() {
        let (read, write) = pipe().unwrap();
        let mut reader = File::from(read);
        let mut pipes = StdioPipes {
            stdin: Some(File::from(write)),
            ..StdioPipes::default()
        };

        pipes.close();
        assert!(pipes.is_closed());
        pipes.close();
        assert!(pipes.is_closed());

        let mut buf = Vec::new();
        assert_eq!(reader.read_to_end(&mut buf).unwrap(), 0);
    }

    #[test]
    fn only_requested_pipes_are_created() {
        let (_child, pipes) = pipes_without_terminal(StdioOptions {
            create_in: false,
            create_out: true,
            create_err: false,
        })
        .unwrap();
        assert!(pipes.stdin.is_none());
        assert!(pipes.stdout.is_some());
        assert!(pipes.stderr.is_none());
        assert!(pipes.pty.is_none());
    }

    #[test]
    fn child_output_reaches_supervisor_pipe() {
        let (child, pipes) = pipes_without_terminal(StdioOptions::all()).unwrap();
        let mut cmd = Command::new("sh");
        let _ = cmd.args(["-c", "read line; echo \"got $line\"; echo oops >&2"]);
        child.apply(&mut cmd);
        let mut proc = cmd.spawn().unwrap();
        drop(cmd);

        let mut stdin = pipes.stdin.unwrap();
        stdin.write_all(b"hi\n").unwrap();
        drop(stdin);

        let mut out = String::new();
        let _ = pipes.stdout.unwrap().read_to_string(&mut out).unwrap();
        let mut err = String::new();
        let _ = pipes.stderr.unwrap().read_to_string(&mut err).unwrap();
        assert!(proc.wait().unwrap().success());
        assert_eq!(out, "got hi\n");
        assert_eq!(err, "oops\n");
    }

    #[test]
    fn waiter_receives_settled_pty() {
        let shared = SharedStdio::awaiting_pty();
        let filler = shared.clone();
        let handle = std::thread::spawn(move || {
            filler.settle_pty(Some(File::open("/dev/null").unwrap()));
        });
        assert!(shared.wait_for_pty(Some(Duration::from_secs(10))).is_some());
        handle.join().unwrap();
        assert!(shared.wait_for_pty(None).is_none());
    }

    #[test]
    fn failed_receive_wakes_waiter_with_none() {
        let shared = SharedStdio::awaiting_pty();
        shared.settle_pty(None);
        assert!(shared.wait_for_pty(None).is_none());
    }

    #[test]
    fn pty_wait_times_out() {
        let shared = SharedStdio::awaiting_pty();
        assert!(shared.wait_for_pty(Some(Duration::from_millis(20))).is_none());
    }
}
