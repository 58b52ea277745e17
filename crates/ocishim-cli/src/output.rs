//! Table formatting for `list` and `ps`.

use std::fmt::Write;

use ocishim_common::types::{ContainerState, ProcessState};

/// Renders containers as an aligned table, one line per container.
#[must_use]
pub fn containers_table(containers: &[ContainerState]) -> String {
    let mut out = format!(
        "{:<32} {:<8} {:<10} {:<25} {}\n",
        "ID", "PID", "STATUS", "CREATED", "BUNDLE"
    );
    for c in containers {
        let _ = writeln!(
            out,
            "{:<32} {:<8} {:<10} {:<25} {}",
            c.id,
            pid_cell(c.pid),
            c.status,
            c.created.format("%Y-%m-%dT%H:%M:%SZ"),
            c.bundle_path.display()
        );
    }
    out
}

/// Renders reconciled processes as an aligned table.
#[must_use]
pub fn processes_table(processes: &[ProcessState]) -> String {
    let mut out = format!("{:<8} {:<6} {:<7} {}\n", "PID", "OWNED", "ZOMBIE", "COMMAND");
    for p in processes {
        let command = if p.command.is_empty() {
            "-".to_owned()
        } else {
            p.command.join(" ")
        };
        let _ = writeln!(
            out,
            "{:<8} {:<6} {:<7} {}",
            p.pid,
            yes_no(p.created_by_runtime),
            yes_no(p.is_zombie),
            command
        );
    }
    out
}

fn pid_cell(pid: u32) -> String {
    if pid == 0 {
        "-".to_owned()
    } else {
        pid.to_string()
    }
}

const fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
