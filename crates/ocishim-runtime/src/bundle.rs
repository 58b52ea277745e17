//! The slices of OCI bundle and process configuration the supervisor reads.
//!
//! Everything else in those documents is the runtime's business and passes
//! through untouched.

use std::path::Path;

use ocishim_common::constants::BUNDLE_CONFIG_FILENAME;
use ocishim_common::error::{Result, ShimError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct BundleConfig {
    #[serde(default)]
    process: Option<TerminalFlag>,
}

#[derive(Debug, Deserialize)]
struct TerminalFlag {
    #[serde(default)]
    terminal: bool,
}

/// Reports whether the bundle's init process asks for a terminal.
///
/// # Errors
///
/// Returns an error if `config.json` cannot be read or parsed.
pub fn bundle_has_terminal(bundle: &Path) -> Result<bool> {
    let path = bundle.join(BUNDLE_CONFIG_FILENAME);
    let raw = std::fs::read(&path).map_err(|e| ShimError::io(&path, e))?;
    let config: BundleConfig = serde_json::from_slice(&raw)?;
    Ok(config.process.is_some_and(|p| p.terminal))
}

/// An OCI process definition for `exec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Allocate a terminal for the process.
    #[serde(default)]
    pub terminal: bool,
    /// Command and arguments.
    pub args: Vec<String>,
    /// Environment as `KEY=value` entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Working directory inside the container.
    #[serde(default = "default_cwd")]
    pub cwd: String,
    /// Fields the supervisor does not interpret (user, capabilities, rlimits, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_cwd() -> String {
    "/".into()
}

impl ProcessSpec {
    /// A non-terminal process running `args` from `/`.
    #[must_use]
    pub fn new(args: Vec<String>) -> Self {
        Self {
            terminal: false,
            args,
            env: Vec::new(),
            cwd: default_cwd(),
            extra: serde_json::Map::new(),
        }
    }

    /// Loads a process definition from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| ShimError::io(path, e))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
