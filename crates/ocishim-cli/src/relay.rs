//! Copies between this terminal and a container process's stdio.

use std::io::{IsTerminal, Read, Write};
use std::thread::JoinHandle;
use std::time::Duration;

use ocishim_core::stdio::SharedStdio;

/// Output relays still running; joining them drains the process's output.
#[derive(Debug, Default)]
pub struct Relays {
    outputs: Vec<JoinHandle<()>>,
    raw_mode: bool,
}

impl Relays {
    /// Waits for the output streams to reach end of file and restores the
    /// local terminal.
    pub fn finish(self) {
        for handle in self.outputs {
            if handle.join().is_err() {
                tracing::warn!("stdio relay thread panicked");
            }
        }
        if self.raw_mode {
            if let Err(e) = crossterm::terminal::disable_raw_mode() {
                tracing::warn!(error = %e, "failed to restore terminal mode");
            }
        }
    }
}

/// Connects this process's stdio to `stdio`.
///
/// For a terminal process the pty master is awaited first and the local
/// terminal switched to raw mode. Stdin is relayed on a detached thread,
/// since reading from it never finishes on its own.
pub fn attach(stdio: &SharedStdio, terminal: bool, timeout: Option<Duration>) -> Relays {
    let mut relays = Relays::default();
    if terminal {
        let Some(pty) = stdio.wait_for_pty(timeout) else {
            tracing::warn!("no terminal master received, output will not be shown");
            return relays;
        };
        match pty.try_clone() {
            Ok(input) => drop(spawn_copy("stdin", std::io::stdin(), input)),
            Err(e) => tracing::warn!(error = %e, "failed to duplicate terminal master"),
        }
        if std::io::stdin().is_terminal() {
            match crossterm::terminal::enable_raw_mode() {
                Ok(()) => relays.raw_mode = true,
                Err(e) => tracing::warn!(error = %e, "failed to enter raw terminal mode"),
            }
        }
        relays.outputs.extend(spawn_copy("stdout", pty, std::io::stdout()));
        return relays;
    }

    if let Some(writer) = stdio.take_stdin() {
        drop(spawn_copy("stdin", std::io::stdin(), writer));
    }
    if let Some(reader) = stdio.take_stdout() {
        relays.outputs.extend(spawn_copy("stdout", reader, std::io::stdout()));
    }
    if let Some(reader) = stdio.take_stderr() {
        relays.outputs.extend(spawn_copy("stderr", reader, std::io::stderr()));
    }
    relays
}

fn spawn_copy<R, W>(stream: &'static str, mut from: R, mut to: W) -> Option<JoinHandle<()>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("relay-{stream}"))
        .spawn(move || {
            if let Err(e) = copy(&mut from, &mut to) {
                // A pty master reports EIO once the last slave closes.
                tracing::debug!(stream, error = %e, "relay stopped");
            }
        })
        .inspect_err(|e| tracing::warn!(stream, error = %e, "failed to spawn relay thread"))
        .ok()
}

/// Like [`std::io::copy`], but flushes after every chunk so interactive
/// output is not held back.
fn copy<R: Read, W: Write>(from: &mut R, to: &mut W) -> std::io::Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = match from.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        to.write_all(&buf[..n])?;
        to.flush()?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_moves_everything_and_counts() {
        let mut from: &[u8] = b"hello relay";
        let mut to = Vec::new();
        assert_eq!(copy(&mut from, &mut to).unwrap(), 11);
        assert_eq!(to, b"hello relay");
    }

    #[test]
    fn nothing_to_relay_for_empty_stdio() {
        let stdio = SharedStdio::with_pipes(ocishim_core::stdio::StdioPipes::default());
        let relays = attach(&stdio, false, None);
        assert!(relays.outputs.is_empty());
        relays.finish();
    }

    #[test]
    fn failed_terminal_receive_relays_nothing() {
        let stdio = SharedStdio::awaiting_pty();
        stdio.settle_pty(None);
        let relays = attach(&stdio, true, Some(Duration::from_millis(10)));
        assert!(relays.outputs.is_empty());
        assert!(!relays.raw_mode);
    }
}
