//! Unified error types for the ocishim workspace.
//!
//! Every failure carries enough context (path, container id, pid, attempted
//! operation) to diagnose it without re-invoking the runtime.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ShimError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The OCI runtime exited non-zero or could not be launched.
    #[error("runtime {operation} failed for container {container}: {detail}")]
    Invocation {
        /// Runtime subcommand that was attempted.
        operation: &'static str,
        /// Container the invocation targeted (empty for global commands).
        container: String,
        /// Captured output or launch failure.
        detail: String,
    },

    /// A console socket message broke the descriptor-passing protocol.
    #[error("console socket protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// On-disk bookkeeping is corrupted.
    #[error("corrupted bookkeeping at {path}: {reason}")]
    Bookkeeping {
        /// Offending path.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Looking up a process through procfs failed.
    #[error("failed to inspect process {pid}: {source}")]
    Introspection {
        /// Process that could not be inspected.
        pid: u32,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Waiting on a process failed.
    #[error("failed waiting on process {pid}: {source}")]
    Wait {
        /// Process that was waited on.
        pid: u32,
        /// Errno returned by `waitpid`.
        source: nix::Error,
    },

    /// An operation was attempted in a lifecycle state that does not allow it.
    #[error("cannot {operation} a process in state {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current lifecycle state.
        state: crate::types::ProcessPhase,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A system call failed.
    #[error("{operation} failed: {source}")]
    Sys {
        /// Name of the failing call.
        operation: &'static str,
        /// Errno returned by the kernel.
        source: nix::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Ways a console socket message can break the single-descriptor protocol.
///
/// Each invariant has its own variant so callers can tell them apart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The name payload filled the receive buffer.
    #[error("name payload of {len} bytes exceeds the {max} byte limit")]
    OversizedName {
        /// Bytes received.
        len: usize,
        /// Exclusive upper bound.
        max: usize,
    },

    /// The ancillary buffer length is not the size of one descriptor.
    #[error("ancillary data is {actual} bytes, expected {expected}")]
    AncillarySize {
        /// Space needed for exactly one descriptor.
        expected: usize,
        /// Bytes of ancillary data received.
        actual: usize,
    },

    /// No control message was present.
    #[error("did not receive any socket control messages")]
    NoControlMessages,

    /// More than one control message was present.
    #[error("received {count} socket control messages, expected one")]
    MultipleControlMessages {
        /// Number of messages received.
        count: usize,
    },

    /// The control message was not `SCM_RIGHTS`.
    #[error("unexpected control message (level {level}, type {kind})")]
    UnexpectedControlMessage {
        /// `cmsg_level` of the message.
        level: i32,
        /// `cmsg_type` of the message.
        kind: i32,
    },

    /// The rights message carried no descriptor.
    #[error("did not receive any file descriptors")]
    NoDescriptors,

    /// The rights message carried more than one descriptor.
    #[error("received {count} file descriptors, expected one")]
    MultipleDescriptors {
        /// Number of descriptors received.
        count: usize,
    },

    /// The peer did not deliver the descriptor within the configured bound.
    #[error("no terminal master received within {after:?}")]
    Timeout {
        /// Configured bound.
        after: Duration,
    },
}

impl ShimError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps an errno with the name of the failing call.
    pub const fn sys(operation: &'static str, source: nix::Error) -> Self {
        Self::Sys { operation, source }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ShimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_error_names_operation_and_output() {
        let err = ShimError::Invocation {
            operation: "kill",
            container: "c1".into(),
            detail: "container not running".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("kill"));
        assert!(msg.contains("c1"));
        assert!(msg.contains("container not running"));
    }

    #[test]
    fn protocol_violation_converts_into_shim_error() {
        let err: ShimError = ProtocolViolation::NoDescriptors.into();
        assert!(matches!(
            err,
            ShimError::Protocol(ProtocolViolation::NoDescriptors)
        ));
    }
}
