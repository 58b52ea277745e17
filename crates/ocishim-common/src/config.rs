//! Global configuration model for the supervisor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, ShimError};

/// Root configuration for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// OCI runtime binary. A bare name is looked up on `PATH`.
    pub runtime_path: PathBuf,
    /// Root directory holding one subdirectory per container.
    pub state_root: PathBuf,
    /// Log file passed to every runtime invocation via `--log`.
    pub runtime_log: PathBuf,
    /// procfs mount used to inspect processes.
    pub proc_root: PathBuf,
    /// Bound on waiting for a terminal master. `None` waits forever.
    pub console_timeout_ms: Option<u64>,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            runtime_path: PathBuf::from(constants::DEFAULT_RUNTIME_PATH),
            state_root: PathBuf::from(constants::DEFAULT_STATE_ROOT),
            runtime_log: PathBuf::from(constants::DEFAULT_RUNTIME_LOG),
            proc_root: PathBuf::from(constants::DEFAULT_PROC_ROOT),
            console_timeout_ms: None,
        }
    }
}

impl ShimConfig {
    /// Loads a configuration from a JSON file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ShimError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialization alone cannot reject.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is empty or the console timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.runtime_path.as_os_str().is_empty() {
            return Err(ShimError::Config {
                message: "runtime_path must not be empty".into(),
            });
        }
        if self.state_root.as_os_str().is_empty() {
            return Err(ShimError::Config {
                message: "state_root must not be empty".into(),
            });
        }
        if self.console_timeout_ms == Some(0) {
            return Err(ShimError::Config {
                message: "console_timeout_ms must be positive; omit it to wait forever".into(),
            });
        }
        Ok(())
    }

    /// Returns the console receive bound as a duration.
    #[must_use]
    pub fn console_timeout(&self) -> Option<Duration> {
        self.console_timeout_ms.map(Duration::from_millis)
    }
}
