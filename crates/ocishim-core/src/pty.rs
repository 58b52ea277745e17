//! Pseudoterminal allocation.
//!
//! Opens a master on the pty multiplexer and prepares the matching slave
//! for handing to a container process.

use std::fs::{File, Permissions};
use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use nix::fcntl::OFlag;
use nix::pty::{PtyMaster, posix_openpt, ptsname_r, unlockpt};
use nix::unistd::{Gid, Uid};
use ocishim_common::error::{Result, ShimError};

/// Mode applied to a freshly allocated slave.
const SLAVE_MODE: u32 = 0o600;

/// A master descriptor and the path of its slave device.
#[derive(Debug)]
pub struct Pty {
    /// Read-write master side.
    pub master: File,
    /// Slave device path, e.g. `/dev/pts/3`.
    pub slave_path: PathBuf,
}

/// Allocates a new pseudoterminal pair.
///
/// The master is opened read-write with `O_NOCTTY | O_CLOEXEC`. The slave
/// is unlocked, set to mode `0600` and owned by `0:0`. On any failure the
/// master is closed before returning.
///
/// # Errors
///
/// Returns [`ShimError::Sys`] if the master cannot be opened, named or
/// unlocked, and [`ShimError::Io`] if the slave cannot be permissioned.
pub fn allocate() -> Result<Pty> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)
        .map_err(|e| ShimError::sys("posix_openpt", e))?;
    let slave_path = PathBuf::from(ptsname_r(&master).map_err(|e| ShimError::sys("ptsname_r", e))?);
    unlockpt(&master).map_err(|e| ShimError::sys("unlockpt", e))?;

    std::fs::set_permissions(&slave_path, Permissions::from_mode(SLAVE_MODE))
        .map_err(|e| ShimError::io(&slave_path, e))?;
    nix::unistd::chown(&slave_path, Some(Uid::from_raw(0)), Some(Gid::from_raw(0)))
        .map_err(|e| ShimError::io(&slave_path, e.into()))?;

    tracing::debug!(slave = %slave_path.display(), "allocated pseudoterminal");
    Ok(Pty {
        master: into_file(master),
        slave_path,
    })
}

fn into_file(master: PtyMaster) -> File {
    File::from(OwnedFd::from(master))
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Read, Write};
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::Path;

    use super::*;

    #[test]
    fn allocated_slave_is_unlocked_and_private() {
        if !nix::unistd::geteuid().is_root() || !Path::new("/dev/ptmx").exists() {
            return;
        }
        // Restricted sandboxes may refuse ptys or chown even for root.
        let Ok(pty) = allocate() else {
            return;
        };

        let meta = std::fs::metadata(&pty.slave_path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, SLAVE_MODE);

        let mut slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&pty.slave_path)
            .unwrap();
        let mut master = pty.master;
        master.write_all(b"ping\n").unwrap();
        let mut buf = [0u8; 5];
        slave.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping\n");
    }
}
