//! On-disk bookkeeping under the state root.
//!
//! ```text
//! <root>/
//!     .pending/<token>/           process directories before their pid is known
//!     <id>/
//!         initpid                 init pid as a decimal string
//!         <pid>/                  one directory per supervisor-created process
//! ```
//!
//! A process directory is published by renaming it from `.pending` into
//! its container directory under the decimal pid. Container directory scans
//! therefore never see a process whose pid is not yet known.

use std::path::{Path, PathBuf};

use ocishim_common::constants::{
    INIT_PID_FILENAME, PENDING_DIR_NAME, PENDING_TOKEN_LEN, PID_FILENAME,
};
use ocishim_common::error::{Result, ShimError};
use ocishim_common::types::ContainerId;

/// Paths and directory operations for the state root.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    /// Creates a layout rooted at `root`. Nothing is touched on disk.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the root and pending directories if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be created.
    pub fn initialize(&self) -> Result<()> {
        create_private_dir(&self.root)?;
        create_private_dir(&self.pending_root())
    }

    /// The state root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding unpublished process directories.
    #[must_use]
    pub fn pending_root(&self) -> PathBuf {
        self.root.join(PENDING_DIR_NAME)
    }

    /// Directory of one container.
    #[must_use]
    pub fn container_dir(&self, id: &ContainerId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Published directory of one process.
    #[must_use]
    pub fn process_dir(&self, id: &ContainerId, pid: u32) -> PathBuf {
        self.container_dir(id).join(pid.to_string())
    }

    /// Reserved file holding the init pid.
    #[must_use]
    pub fn init_pid_path(&self, id: &ContainerId) -> PathBuf {
        self.container_dir(id).join(INIT_PID_FILENAME)
    }

    /// Creates the container directory.
    ///
    /// Returns `true` if it did not exist before, so that a failed create
    /// only removes what it made.
    ///
    /// # Errors
    ///
    /// Returns an error if the id cannot name a directory or creation fails.
    pub fn make_container_dir(&self, id: &ContainerId) -> Result<bool> {
        validate_id(id)?;
        let dir = self.container_dir(id);
        match std::fs::create_dir(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(ShimError::io(dir, e)),
        }
    }

    /// Allocates a randomly named pending directory for a new process.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn allocate_pending(&self, id: &ContainerId) -> Result<PendingProcessDir> {
        let mut token = uuid::Uuid::new_v4().simple().to_string();
        token.truncate(PENDING_TOKEN_LEN);
        let path = self.pending_root().join(token);
        std::fs::create_dir(&path).map_err(|e| ShimError::io(&path, e))?;
        tracing::debug!(id = %id, path = %path.display(), "allocated pending process directory");
        Ok(PendingProcessDir {
            path,
            published: false,
        })
    }

    /// Records the container's init pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_init_pid(&self, id: &ContainerId, pid: u32) -> Result<()> {
        let path = self.init_pid_path(id);
        std::fs::write(&path, pid.to_string()).map_err(|e| ShimError::io(path, e))
    }

    /// Reads the container's init pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or does not hold a pid.
    pub fn read_init_pid(&self, id: &ContainerId) -> Result<u32> {
        read_pid(&self.init_pid_path(id))
    }

    /// Lists every entry name in the container directory, reserved file included.
    ///
    /// # Errors
    ///
    /// Returns a bookkeeping error if the directory cannot be read or holds
    /// a name that is not valid UTF-8.
    pub fn process_entries(&self, id: &ContainerId) -> Result<Vec<String>> {
        let dir = self.container_dir(id);
        let read_err = |e: std::io::Error| ShimError::Bookkeeping {
            path: dir.clone(),
            reason: format!("failed to read container directory: {e}"),
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let name = entry.file_name().into_string().map_err(|raw| ShimError::Bookkeeping {
                path: dir.join(&raw),
                reason: "entry name is not valid UTF-8".into(),
            })?;
            names.push(name);
        }
        Ok(names)
    }

    /// Removes everything the supervisor stored for a container.
    ///
    /// A directory that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails for another reason.
    pub fn remove_container(&self, id: &ContainerId) -> Result<()> {
        validate_id(id)?;
        remove_dir_if_present(&self.container_dir(id))
    }

    /// Removes one published process directory.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails for a reason other than absence.
    pub fn remove_process(&self, id: &ContainerId, pid: u32) -> Result<()> {
        remove_dir_if_present(&self.process_dir(id, pid))
    }
}

/// A process directory that has not been published under a pid yet.
///
/// Dropping it without calling [`PendingProcessDir::publish`] removes the
/// directory, which is how failed launches clean up after themselves.
#[derive(Debug)]
pub struct PendingProcessDir {
    path: PathBuf,
    published: bool,
}

impl PendingProcessDir {
    /// Current location of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File the runtime writes the new pid into.
    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.path.join(PID_FILENAME)
    }

    /// Reads the pid the runtime reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the pid file is missing or malformed.
    pub fn read_pid(&self) -> Result<u32> {
        read_pid(&self.pid_file())
    }

    /// Atomically renames the directory to `<container_dir>/<pid>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails; the pending directory is then
    /// removed on drop.
    pub fn publish(mut self, container_dir: &Path, pid: u32) -> Result<PathBuf> {
        let target = container_dir.join(pid.to_string());
        std::fs::rename(&self.path, &target).map_err(|e| ShimError::io(&target, e))?;
        self.published = true;
        tracing::debug!(pid, path = %target.display(), "published process directory");
        Ok(target)
    }
}

impl Drop for PendingProcessDir {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        if let Err(e) = remove_dir_if_present(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pending process directory");
        }
    }
}

/// Rejects ids that cannot safely name a directory under the root.
fn validate_id(id: &ContainerId) -> Result<()> {
    let raw = id.as_str();
    if raw.is_empty() || raw.starts_with('.') || raw.contains('/') || raw.contains('\0') {
        return Err(ShimError::Config {
            message: format!("invalid container id {raw:?}"),
        });
    }
    Ok(())
}

fn create_private_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|e| ShimError::io(path, e))
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ShimError::io(path, e)),
    }
}

fn read_pid(path: &Path) -> Result<u32> {
    let raw = std::fs::read_to_string(path).map_err(|e| ShimError::io(path, e))?;
    raw.trim().parse().map_err(|_| ShimError::Bookkeeping {
        path: path.to_path_buf(),
        reason: format!("{:?} is not a pid", raw.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, StateLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("state"));
        layout.initialize().unwrap();
        (dir, layout)
    }

    #[test]
    fn publish_moves_pending_dir_under_pid() {
        let (_tmp, layout) = layout();
        let id = ContainerId::new("c1");
        assert!(layout.make_container_dir(&id).unwrap());

        let pending = layout.allocate_pending(&id).unwrap();
        let pending_path = pending.path().to_path_buf();
        std::fs::write(pending.pid_file(), "4242").unwrap();
        assert_eq!(pending.read_pid().unwrap(), 4242);

        let published = pending.publish(&layout.container_dir(&id), 4242).unwrap();
        assert_eq!(published, layout.process_dir(&id, 4242));
        assert!(published.join(PID_FILENAME).exists());
        assert!(!pending_path.exists());
    }

    #[test]
    fn unpublished_pending_dir_is_removed_on_drop() {
        let (_tmp, layout) = layout();
        let id = ContainerId::new("c1");
        let pending = layout.allocate_pending(&id).unwrap();
        let path = pending.path().to_path_buf();
        assert!(path.exists());
        drop(pending);
        assert!(!path.exists());
    }

    #[test]
    fn pending_name_does_not_grow_with_the_id() {
        let (_tmp, layout) = layout();
        let id = ContainerId::new("f".repeat(64));
        let pending = layout.allocate_pending(&id).unwrap();
        let name = pending.path().file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), PENDING_TOKEN_LEN);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));

        let default = StateLayout::new(ocishim_common::constants::DEFAULT_STATE_ROOT);
        let socket = default
            .pending_root()
            .join(name)
            .join(ocishim_common::constants::CONSOLE_SOCKET_FILENAME);
        assert!(socket.as_os_str().len() < 108);
    }

    #[test]
    fn pending_dirs_are_not_process_entries() {
        let (_tmp, layout) = layout();
        let id = ContainerId::new("c1");
        let _ = layout.make_container_dir(&id).unwrap();
        let _pending = layout.allocate_pending(&id).unwrap();
        layout.write_init_pid(&id, 10).unwrap();

        assert_eq!(layout.process_entries(&id).unwrap(), vec![INIT_PID_FILENAME]);
        assert_eq!(layout.read_init_pid(&id).unwrap(), 10);
    }

    #[test]
    fn existing_container_dir_is_reported() {
        let (_tmp, layout) = layout();
        let id = ContainerId::new("c1");
        assert!(layout.make_container_dir(&id).unwrap());
        assert!(!layout.make_container_dir(&id).unwrap());
    }

    #[test]
    fn remove_container_is_idempotent() {
        let (_tmp, layout) = layout();
        let id = ContainerId::new("c1");
        let _ = layout.make_container_dir(&id).unwrap();
        layout.remove_container(&id).unwrap();
        layout.remove_container(&id).unwrap();
        assert!(!layout.container_dir(&id).exists());
    }

    #[test]
    fn ids_that_escape_the_root_are_rejected() {
        let (_tmp, layout) = layout();
        for raw in ["", ".pending", "..", "a/b"] {
            assert!(matches!(
                layout.make_container_dir(&ContainerId::new(raw)),
                Err(ShimError::Config { .. })
            ));
        }
    }

    #[test]
    fn malformed_init_pid_is_bookkeeping_corruption() {
        let (_tmp, layout) = layout();
        let id = ContainerId::new("c1");
        let _ = layout.make_container_dir(&id).unwrap();
        std::fs::write(layout.init_pid_path(&id), "not-a-pid").unwrap();
        assert!(matches!(
            layout.read_init_pid(&id),
            Err(ShimError::Bookkeeping { .. })
        ));
    }
}
