//! Supervisor entry point.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ocishim_common::config::ShimConfig;
use ocishim_common::error::{Result, ShimError};
use ocishim_common::types::{ContainerId, ContainerState, StdioOptions};

use crate::bundle::bundle_has_terminal;
use crate::container::Container;
use crate::layout::StateLayout;
use crate::process::{self, Launch, Process};
use crate::reconcile::ProcFs;
use crate::tool::RuntimeTool;

/// State every container and process handle refers back to.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) layout: StateLayout,
    pub(crate) tool: RuntimeTool,
    pub(crate) procfs: ProcFs,
    pub(crate) console_timeout: Option<Duration>,
}

/// Creates and reopens containers under one state root.
///
/// Cloning is cheap; clones share the same runtime handle and layout.
#[derive(Debug, Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Validates `config` and prepares the state root and runtime log directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the runtime binary
    /// cannot be resolved, or a directory cannot be created.
    pub fn new(config: &ShimConfig) -> Result<Self> {
        config.validate()?;
        let tool = RuntimeTool::new(&config.runtime_path, config.runtime_log.clone())?;
        if let Some(parent) = tool.log_path().parent().filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent).map_err(|e| ShimError::io(parent, e))?;
        }
        let layout = StateLayout::new(&config.state_root);
        layout.initialize()?;
        tracing::debug!(
            root = %layout.root().display(),
            runtime = %tool.binary().display(),
            "engine initialized"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                layout,
                tool,
                procfs: ProcFs::new(&config.proc_root),
                console_timeout: config.console_timeout(),
            }),
        })
    }

    /// On-disk layout this engine manages.
    #[must_use]
    pub fn layout(&self) -> &StateLayout {
        &self.shared.layout
    }

    /// Handle on the runtime binary.
    #[must_use]
    pub fn tool(&self) -> &RuntimeTool {
        &self.shared.tool
    }

    /// Creates a container from `bundle` without starting its user process.
    ///
    /// The bundle's `process.terminal` flag selects a pty over pipes. On
    /// failure the container directory is removed again if this call made it.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be read, the runtime fails, or
    /// bookkeeping cannot be written.
    pub fn create_container(
        &self,
        id: ContainerId,
        bundle: &Path,
        stdio: StdioOptions,
    ) -> Result<Container> {
        let fresh = self.shared.layout.make_container_dir(&id)?;
        match self.launch_init(&id, bundle, stdio) {
            Ok(init) => {
                tracing::info!(id = %id, pid = init.pid(), bundle = %bundle.display(), "container created");
                Ok(Container::new(init))
            }
            Err(e) => {
                if fresh {
                    if let Err(cleanup) = self.shared.layout.remove_container(&id) {
                        tracing::warn!(id = %id, error = %cleanup, "failed to remove container directory after failed create");
                    }
                }
                tracing::warn!(id = %id, error = %e, "container create failed");
                Err(e)
            }
        }
    }

    fn launch_init(&self, id: &ContainerId, bundle: &Path, stdio: StdioOptions) -> Result<Process> {
        let terminal = bundle_has_terminal(bundle)?;
        let pending = self.shared.layout.allocate_pending(id)?;
        let args: Vec<OsString> = vec![
            "--bundle".into(),
            bundle.as_os_str().to_owned(),
            "--no-pivot".into(),
        ];
        let init = process::launch(
            &self.shared,
            id,
            pending,
            Launch {
                operation: "create",
                args,
                terminal,
                stdio,
            },
        )?;
        self.shared.layout.write_init_pid(id, init.pid())?;
        Ok(init)
    }

    /// Reattaches to a container created by an earlier invocation.
    ///
    /// The returned handle has no stdio; only the creating invocation held
    /// those.
    ///
    /// # Errors
    ///
    /// Returns an error if the container has no recorded init pid.
    pub fn open_container(&self, id: ContainerId) -> Result<Container> {
        let pid = self.shared.layout.read_init_pid(&id)?;
        tracing::debug!(id = %id, pid, "opened existing container");
        Ok(Container::new(Process::attach(Arc::clone(&self.shared), id, pid)))
    }

    /// Every container the runtime knows, stopped ones included.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime fails.
    pub fn list_containers(&self) -> Result<Vec<ContainerState>> {
        self.shared.tool.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> ShimConfig {
        ShimConfig {
            runtime_path: "true".into(),
            state_root: dir.join("state"),
            runtime_log: dir.join("logs/runtime.log"),
            proc_root: dir.join("proc"),
            console_timeout_ms: None,
        }
    }

    #[test]
    fn new_prepares_state_root_and_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::new(&config(tmp.path())).unwrap();
        assert!(engine.layout().pending_root().is_dir());
        assert!(tmp.path().join("logs").is_dir());
        assert!(engine.tool().binary().is_absolute());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.console_timeout_ms = Some(0);
        assert!(matches!(Engine::new(&cfg), Err(ShimError::Config { .. })));
    }

    #[test]
    fn open_without_init_pid_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::new(&config(tmp.path())).unwrap();
        assert!(matches!(
            engine.open_container(ContainerId::new("missing")),
            Err(ShimError::Io { .. })
        ));
    }
}
