//! Domain primitive types used across the ocishim workspace.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a container, as understood by the OCI runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a container as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The runtime is still setting the container up.
    Creating,
    /// Created but the user process has not been started.
    Created,
    /// The user process is running.
    Running,
    /// All processes are frozen.
    Paused,
    /// The init process has exited.
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Container state object as printed by the runtime's `state` and `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// OCI specification version the container was created with.
    #[serde(default)]
    pub oci_version: String,
    /// Container identifier.
    pub id: ContainerId,
    /// Pid of the init process (0 once stopped).
    #[serde(default)]
    pub pid: u32,
    /// Current status.
    pub status: ContainerStatus,
    /// Path to the OCI bundle.
    #[serde(rename = "bundle", default)]
    pub bundle_path: PathBuf,
    /// Path to the root filesystem.
    #[serde(rename = "rootfs", default)]
    pub rootfs_path: PathBuf,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

/// One process inside a container, as classified by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    /// Process id in the supervisor's pid namespace.
    pub pid: u32,
    /// Command line, one entry per argument.
    pub command: Vec<String>,
    /// True iff the supervisor spawned this process (a pid directory exists).
    pub created_by_runtime: bool,
    /// True iff the process is still present but the runtime no longer reports it.
    pub is_zombie: bool,
}

/// Which standard streams get a pipe pair for a non-terminal process.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioOptions {
    /// Create a pipe for the process's stdin.
    pub create_in: bool,
    /// Create a pipe for the process's stdout.
    pub create_out: bool,
    /// Create a pipe for the process's stderr.
    pub create_err: bool,
}

impl StdioOptions {
    /// Requests all three pipes.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            create_in: true,
            create_out: true,
            create_err: true,
        }
    }
}

/// Supervisor-side lifecycle of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessPhase {
    /// Runtime returned success; pid known and directory published.
    Started,
    /// A wait observed termination.
    Exited,
    /// Directory and runtime-side state removed.
    Deleted,
    /// The runtime invocation failed before a pid was known.
    Failed,
}

impl fmt::Display for ProcessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Exited => write!(f, "exited"),
            Self::Deleted => write!(f, "deleted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How a process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Pid that was waited on.
    pub pid: u32,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if the process was killed.
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited with code zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Shell-style exit code: the exit code, or 128 plus the signal number.
    #[must_use]
    pub const fn shell_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "pid {} exited with code {code}", self.pid),
            (None, Some(signal)) => write!(f, "pid {} killed by signal {signal}", self.pid),
            (None, None) => write!(f, "pid {} terminated", self.pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_state_parses_runtime_json() {
        let json = r#"{
            "ociVersion": "1.0.2",
            "id": "c1",
            "pid": 4242,
            "status": "running",
            "bundle": "/run/bundles/c1",
            "rootfs": "/run/bundles/c1/rootfs",
            "created": "2024-03-01T10:00:00.123456789Z",
            "owner": ""
        }"#;
        let state: ContainerState = serde_json::from_str(json).unwrap();
        assert_eq!(state.id.as_str(), "c1");
        assert_eq!(state.pid, 4242);
        assert_eq!(state.status, ContainerStatus::Running);
        assert_eq!(state.bundle_path, PathBuf::from("/run/bundles/c1"));
    }

    #[test]
    fn stopped_container_state_defaults_pid() {
        let json = r#"{"id":"c2","status":"stopped","created":"2024-03-01T10:00:00Z"}"#;
        let state: ContainerState = serde_json::from_str(json).unwrap();
        assert_eq!(state.pid, 0);
        assert_eq!(state.status.to_string(), "stopped");
    }

    #[test]
    fn exit_status_shell_code_uses_signal_offset() {
        let killed = ExitStatus {
            pid: 7,
            code: None,
            signal: Some(9),
        };
        assert_eq!(killed.shell_code(), 137);
        assert!(!killed.success());
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(ContainerId::generate(), ContainerId::generate());
    }
}
