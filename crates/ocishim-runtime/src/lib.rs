//! Container supervision over an external OCI runtime.
//!
//! The [`engine::Engine`] drives the runtime binary as a subprocess, owns the
//! per-container directory tree under the state root, and merges the
//! runtime's view of running processes with procfs and that tree.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bundle;
pub mod container;
pub mod engine;
pub mod layout;
pub mod process;
pub mod reconcile;
pub mod tool;
