//! Process state reconciliation.
//!
//! Three sources disagree about which processes a container has:
//!
//! - the runtime's `ps`, which lists running pids but forgets zombies;
//! - procfs, which knows every pid that has not been reaped;
//! - the container directory, which has one entry per pid the supervisor
//!   spawned.
//!
//! The functions here merge them into one [`ProcessState`] list. They take
//! their inputs as plain values plus a [`ProcessIntrospector`], so they run
//! without a live runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ocishim_common::constants::INIT_PID_FILENAME;
use ocishim_common::error::{Result, ShimError};
use ocishim_common::types::ProcessState;

/// Read-only view of live OS processes.
pub trait ProcessIntrospector {
    /// Whether `pid` is still present, running or zombie.
    fn exists(&self, pid: u32) -> bool;

    /// Command line of `pid`, one entry per argument.
    ///
    /// # Errors
    ///
    /// Returns [`ShimError::Introspection`] if the process cannot be read,
    /// typically because it vanished after enumeration.
    fn command_line(&self, pid: u32) -> Result<Vec<String>>;
}

/// [`ProcessIntrospector`] backed by a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    /// Uses the procfs mounted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProcessIntrospector for ProcFs {
    fn exists(&self, pid: u32) -> bool {
        self.root.join(pid.to_string()).try_exists().unwrap_or(false)
    }

    fn command_line(&self, pid: u32) -> Result<Vec<String>> {
        let path = self.root.join(pid.to_string()).join("cmdline");
        let raw = std::fs::read(&path).map_err(|source| ShimError::Introspection { pid, source })?;
        Ok(parse_cmdline(&raw))
    }
}

/// Splits a NUL-separated `cmdline` into arguments.
///
/// Zombies and kernel threads have an empty `cmdline`, which yields no
/// arguments.
#[must_use]
pub fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    let trimmed = raw.strip_suffix(b"\0").unwrap_or(raw);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split(|&b| b == 0)
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

/// Parses a container directory entry into a pid.
///
/// The reserved init pid file yields `None`; any other non-integer name is
/// bookkeeping corruption.
fn entry_pid(dir: &Path, name: &str) -> Result<Option<u32>> {
    if name == INIT_PID_FILENAME {
        return Ok(None);
    }
    name.parse().map(Some).map_err(|_| ShimError::Bookkeeping {
        path: dir.join(name),
        reason: format!("failed to parse {name:?} as a pid"),
    })
}

/// Seeds the map with every running pid, none created by the supervisor.
fn seed<I: ProcessIntrospector + ?Sized>(
    running: &[u32],
    introspect: &I,
) -> Result<BTreeMap<u32, ProcessState>> {
    running
        .iter()
        .map(|&pid| {
            Ok((
                pid,
                ProcessState {
                    pid,
                    command: introspect.command_line(pid)?,
                    created_by_runtime: false,
                    is_zombie: false,
                },
            ))
        })
        .collect()
}

/// Running processes only.
///
/// Every pid in `running` appears once; it is marked created-by-runtime if
/// `entries` (the names in `dir`) holds a directory for it.
///
/// # Errors
///
/// Returns a bookkeeping error for an entry that is neither the reserved
/// file nor a pid, and an introspection error if a command line cannot be
/// read.
pub fn running_processes<I: ProcessIntrospector + ?Sized>(
    running: &[u32],
    dir: &Path,
    entries: &[String],
    introspect: &I,
) -> Result<Vec<ProcessState>> {
    let mut states = seed(running, introspect)?;
    for name in entries {
        let Some(pid) = entry_pid(dir, name)? else {
            continue;
        };
        if let Some(state) = states.get_mut(&pid) {
            state.created_by_runtime = true;
        }
    }
    Ok(states.into_values().collect())
}

/// Running processes plus supervisor-created zombies.
///
/// Starts like [`running_processes`]. A pid directory whose process still
/// exists but is missing from `running` is a zombie. Pids known to neither
/// the runtime nor procfs have been reaped and are left out.
///
/// # Errors
///
/// Same as [`running_processes`].
pub fn all_processes<I: ProcessIntrospector + ?Sized>(
    running: &[u32],
    dir: &Path,
    entries: &[String],
    introspect: &I,
) -> Result<Vec<ProcessState>> {
    let mut states = seed(running, introspect)?;
    for name in entries {
        let Some(pid) = entry_pid(dir, name)? else {
            continue;
        };
        if !introspect.exists(pid) {
            continue;
        }
        if let Some(state) = states.get_mut(&pid) {
            state.created_by_runtime = true;
        } else {
            let command = introspect.command_line(pid)?;
            let _ = states.insert(
                pid,
                ProcessState {
                    pid,
                    command,
                    created_by_runtime: true,
                    is_zombie: true,
                },
            );
        }
    }
    Ok(states.into_values().collect())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// Processes that exist, with their command lines.
    struct FakeProcs(HashMap<u32, Vec<String>>);

    impl FakeProcs {
        fn with(pids: &[u32]) -> Self {
            Self(
                pids.iter()
                    .map(|&pid| (pid, vec![format!("proc-{pid}")]))
                    .collect(),
            )
        }
    }

    impl ProcessIntrospector for FakeProcs {
        fn exists(&self, pid: u32) -> bool {
            self.0.contains_key(&pid)
        }

        fn command_line(&self, pid: u32) -> Result<Vec<String>> {
            self.0
                .get(&pid)
                .cloned()
                .ok_or_else(|| ShimError::Introspection {
                    pid,
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
        }
    }

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_owned()).collect()
    }

    fn dir() -> PathBuf {
        PathBuf::from("/var/lib/ocishim/c1")
    }

    #[test]
    fn running_view_marks_only_supervisor_pids() {
        let procs = FakeProcs::with(&[10, 11]);
        let states =
            running_processes(&[10, 11], &dir(), &names(&["11", "initpid"]), &procs).unwrap();

        assert_eq!(states.len(), 2);
        assert_eq!(states[0].pid, 10);
        assert!(!states[0].created_by_runtime);
        assert_eq!(states[1].pid, 11);
        assert!(states[1].created_by_runtime);
        assert!(states.iter().all(|s| !s.is_zombie));
        assert_eq!(states[1].command, vec!["proc-11"]);
    }

    #[test]
    fn all_view_adds_supervisor_zombies() {
        let procs = FakeProcs::with(&[10, 11, 12]);
        let states =
            all_processes(&[10, 11], &dir(), &names(&["11", "12", "initpid"]), &procs).unwrap();

        assert_eq!(states.len(), 3);
        let zombie = &states[2];
        assert_eq!(zombie.pid, 12);
        assert!(zombie.is_zombie);
        assert!(zombie.created_by_runtime);
        assert!(!states[0].created_by_runtime);
        assert!(states[1].created_by_runtime);
        assert!(!states[1].is_zombie);
    }

    #[test]
    fn reaped_pids_are_omitted() {
        let procs = FakeProcs::with(&[10]);
        let states = all_processes(&[10], &dir(), &names(&["13"]), &procs).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].pid, 10);
    }

    #[test]
    fn views_agree_on_shared_pids() {
        let procs = FakeProcs::with(&[10, 11, 12]);
        let entries = names(&["11", "12", "initpid"]);
        let running = running_processes(&[10, 11], &dir(), &entries, &procs).unwrap();
        let all = all_processes(&[10, 11], &dir(), &entries, &procs).unwrap();
        for state in &running {
            assert_eq!(all.iter().find(|s| s.pid == state.pid), Some(state));
        }
    }

    #[test]
    fn non_pid_entry_is_bookkeeping_corruption_in_both_views() {
        let procs = FakeProcs::with(&[10]);
        let entries = names(&["abc"]);
        assert!(matches!(
            running_processes(&[10], &dir(), &entries, &procs),
            Err(ShimError::Bookkeeping { .. })
        ));
        assert!(matches!(
            all_processes(&[10], &dir(), &entries, &procs),
            Err(ShimError::Bookkeeping { .. })
        ));
    }

    #[test]
    fn vanished_process_is_an_introspection_error() {
        let procs = FakeProcs::with(&[10]);
        assert!(matches!(
            running_processes(&[10, 99], &dir(), &[], &procs),
            Err(ShimError::Introspection { pid: 99, .. })
        ));
    }

    #[test]
    fn cmdline_is_split_on_nul() {
        assert_eq!(parse_cmdline(b"ping\0google.com\0"), vec!["ping", "google.com"]);
        assert_eq!(parse_cmdline(b"sleep\0\0"), vec!["sleep", ""]);
        assert!(parse_cmdline(b"").is_empty());
    }

    #[test]
    fn procfs_reads_fake_tree() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("42")).unwrap();
        std::fs::write(root.path().join("42/cmdline"), b"sh\0-c\0true\0").unwrap();

        let procfs = ProcFs::new(root.path());
        assert!(procfs.exists(42));
        assert!(!procfs.exists(43));
        assert_eq!(procfs.command_line(42).unwrap(), vec!["sh", "-c", "true"]);
        assert!(matches!(
            procfs.command_line(43),
            Err(ShimError::Introspection { pid: 43, .. })
        ));
    }
}
