//! Small process-related helpers shared across the workspace.

use std::ffi::OsStr;

use sysinfo::{Pid, ProcessesToUpdate, System};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Kill a process and all of its descendants, children first.
///
/// Recorder binaries typically spawn helper interpreters; killing only the
/// root would leave those orphaned and still holding the output file open.
/// Best effort: missing PIDs and failed kills are logged and skipped.
pub fn kill_process_tree(root: u32) {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let root_pid = Pid::from_u32(root);
    let mut tree = vec![root_pid];
    // BFS over the process table; processes list their parent, not children.
    let mut frontier = vec![root_pid];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in system.processes() {
            if process.parent() == Some(parent) {
                tree.push(*pid);
                frontier.push(*pid);
            }
        }
    }

    for pid in tree.iter().rev() {
        match system.process(*pid) {
            Some(process) => {
                if !process.kill() {
                    tracing::warn!(pid = pid.as_u32(), "failed to kill process");
                }
            }
            None => {
                tracing::debug!(pid = pid.as_u32(), "process already gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_tree_on_missing_pid_is_a_noop() {
        // PIDs this large do not exist on any supported platform.
        kill_process_tree(u32::MAX - 7);
    }

    #[cfg(unix)]
    #[test]
    fn kill_tree_terminates_a_spawned_child() {
        let mut child = std_command("sleep").arg("300").spawn().unwrap();
        kill_process_tree(child.id());
        // A killed child should be reapable without waiting 300 seconds.
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
