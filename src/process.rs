//! Process-table queries and forced termination for the monitored targets.
//!
//! Table refreshes are synchronous system calls and run on the blocking
//! pool.

use async_trait::async_trait;
use sysinfo::{Process, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// Answers whether a named process is currently running.
#[async_trait]
pub trait ProcessWatcher: Send + Sync {
    /// True iff any process-table entry matches `name` case-insensitively.
    async fn is_running(&self, name: &str) -> bool;
}

/// Best-effort forced termination of processes by name.
#[async_trait]
pub trait ProcessTerminator: Send + Sync {
    /// Signal every process whose name matches one of `names`. Returns how
    /// many processes were signalled; names with no match are not an error.
    async fn terminate(&self, names: &[&str]) -> usize;
}

/// `sysinfo`-backed process table. Every call takes a fresh snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTable;

impl ProcessTable {
    pub fn new() -> Self {
        Self
    }

    fn snapshot() -> System {
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);
        sys
    }

    fn find(name: &str) -> bool {
        let sys = Self::snapshot();
        sys.processes()
            .values()
            .any(|p| name_matches(&process_name(p), name))
    }

    fn terminate_matching(names: &[String]) -> usize {
        let sys = Self::snapshot();
        let mut signalled = 0;

        for process in sys.processes().values() {
            let pname = process_name(process);
            if !names.iter().any(|wanted| name_matches(&pname, wanted)) {
                continue;
            }
            let pid = process.pid().as_u32();
            if send_terminate(process) {
                info!(pid, name = %pname, "terminated process");
                signalled += 1;
            } else {
                warn!(pid, name = %pname, "failed to terminate process");
            }
        }

        if signalled == 0 {
            debug!(?names, "no matching processes to terminate");
        }
        signalled
    }
}

/// Case-insensitive exact name comparison. Entries whose name could not be
/// read come through empty and never match.
fn name_matches(process_name: &str, wanted: &str) -> bool {
    !process_name.is_empty() && process_name.to_lowercase() == wanted.to_lowercase()
}

fn process_name(process: &Process) -> String {
    process.name().to_string_lossy().into_owned()
}

#[async_trait]
impl ProcessWatcher for ProcessTable {
    async fn is_running(&self, name: &str) -> bool {
        let wanted = name.to_string();
        match tokio::task::spawn_blocking(move || Self::find(&wanted)).await {
            Ok(found) => {
                debug!(name, found, "process table query");
                found
            }
            Err(e) => {
                warn!(name, error = %e, "process table query failed");
                false
            }
        }
    }
}

#[async_trait]
impl ProcessTerminator for ProcessTable {
    async fn terminate(&self, names: &[&str]) -> usize {
        let owned: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        match tokio::task::spawn_blocking(move || Self::terminate_matching(&owned)).await {
            Ok(signalled) => signalled,
            Err(e) => {
                warn!(?names, error = %e, "process termination failed");
                0
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(process: &Process) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(process.pid().as_u32() as i32);
    match kill(pid, Signal::SIGTERM) {
        Ok(()) => true,
        // Exited between snapshot and signal.
        Err(Errno::ESRCH) => false,
        Err(e) => {
            debug!(error = %e, "SIGTERM refused, falling back to hard kill");
            process.kill()
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(process: &Process) -> bool {
    process.kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_matches_case_insensitive() {
        assert!(name_matches("BAAH.exe", "baah.EXE"));
        assert!(name_matches("MuMuNxDevice.exe", "MUMUNXDEVICE.EXE"));
        assert!(!name_matches("BAAH.exe", "BAAH"));
        assert!(!name_matches("BAAH.exe.bak", "BAAH.exe"));
    }

    #[test]
    fn test_unreadable_name_never_matches() {
        assert!(!name_matches("", ""));
        assert!(!name_matches("", "BAAH.exe"));
    }

    #[tokio::test]
    async fn test_current_process_is_running() {
        let sys = ProcessTable::snapshot();
        let me = sysinfo::get_current_pid().unwrap();
        let name = process_name(sys.process(me).unwrap());
        assert!(ProcessTable::new().is_running(&name).await);
        assert!(ProcessTable::new().is_running(&name.to_uppercase()).await);
    }

    #[tokio::test]
    async fn test_missing_process_is_not_running() {
        assert!(
            !ProcessTable::new()
                .is_running("definitely-not-a-real-process-xyz")
                .await
        );
    }

    #[tokio::test]
    async fn test_terminate_unknown_name_is_noop() {
        let count = ProcessTable::new()
            .terminate(&["definitely-not-a-real-process-xyz"])
            .await;
        assert_eq!(count, 0);
    }
}
