//! # ocishim-core
//!
//! Low-level Linux I/O plumbing for the supervisor.
//!
//! This crate provides safe abstractions over:
//! - **Pseudoterminals**: opening `/dev/ptmx`, unlocking and permissioning
//!   the slave side.
//! - **Console sockets**: receiving a terminal master descriptor from the
//!   OCI runtime over a Unix domain socket (`SCM_RIGHTS`).
//! - **Stdio**: pipe pairs for non-terminal processes and the handle set
//!   returned to callers.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod console;
pub mod pty;
pub mod stdio;
