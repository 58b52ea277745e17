//! System-wide constants and default paths.

/// Default location of the OCI runtime binary.
pub const DEFAULT_RUNTIME_PATH: &str = "/sbin/runc";

/// Default root directory holding one subdirectory per container.
pub const DEFAULT_STATE_ROOT: &str = "/var/lib/ocishim";

/// Default log file handed to the runtime via `--log`.
pub const DEFAULT_RUNTIME_LOG: &str = "/var/log/ocishim/runtime.log";

/// Default procfs mount point used for process introspection.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Reserved file inside a container directory holding the init pid.
pub const INIT_PID_FILENAME: &str = "initpid";

/// Directory under the state root where unpublished process directories live.
///
/// Process directories stay here under a random name until the runtime
/// reports their pid, so a container directory scan never observes them.
pub const PENDING_DIR_NAME: &str = ".pending";

/// File inside a process directory the runtime writes the new pid into.
pub const PID_FILENAME: &str = "pid";

/// Console socket filename inside a process directory.
pub const CONSOLE_SOCKET_FILENAME: &str = "master.sock";

/// Hex characters in the random name of a pending process directory.
///
/// The name carries no container id so the console socket path stays
/// within `sun_path` whatever the id length.
pub const PENDING_TOKEN_LEN: usize = 16;

/// Process definition filename handed to `exec --process`.
pub const PROCESS_SPEC_FILENAME: &str = "process.json";

/// OCI bundle configuration filename.
pub const BUNDLE_CONFIG_FILENAME: &str = "config.json";

/// Upper bound (exclusive) on the name payload of a console message.
pub const MAX_CONSOLE_NAME_LEN: usize = 4096;

/// Binary name for the CLI.
pub const BIN_NAME: &str = "oshim";
