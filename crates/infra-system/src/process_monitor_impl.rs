// Process monitor implementation
// reason: sysinfo for cross-platform process table scans, nix for signals on unix
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tracing::{debug, warn};

use officepool_core::port::process_monitor::{ProcessError, ProcessMonitor, ProcessQuery};

/// Process monitor backed by the sysinfo process table
///
/// Stateless from the pool's point of view: every call rescans the table.
pub struct SysinfoProcessMonitor {
    system: Arc<Mutex<System>>,
}

impl SysinfoProcessMonitor {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    fn scan(&self, query: &ProcessQuery) -> Result<Option<u32>, ProcessError> {
        let mut sys = self
            .system
            .lock()
            .map_err(|_| ProcessError::ScanFailed("process table lock poisoned".to_string()))?;
        sys.refresh_processes();

        let own_pid = std::process::id();
        let found = sys
            .processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own_pid)
            .filter(|(_, process)| query.matches(process.name(), process.cmd()))
            .map(|(pid, _)| pid.as_u32())
            .min();
        Ok(found)
    }
}

impl Default for SysinfoProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessMonitor for SysinfoProcessMonitor {
    async fn find_pid(&self, query: &ProcessQuery) -> Result<Option<u32>, ProcessError> {
        let found = self.scan(query)?;
        debug!(
            command = %query.command,
            argument = %query.argument,
            pid = ?found,
            "Process table scanned"
        );
        Ok(found)
    }

    async fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        warn!(pid, "Killing process");
        kill_pid(pid, &self.system)
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32, _system: &Mutex<System>) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as UnixPid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::KillFailed {
        pid,
        reason: "pid out of range".to_string(),
    })?;
    match kill(UnixPid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(ProcessError::KillFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32, system: &Mutex<System>) -> Result<(), ProcessError> {
    use sysinfo::Pid;

    let mut sys = system
        .lock()
        .map_err(|_| ProcessError::ScanFailed("process table lock poisoned".to_string()))?;
    sys.refresh_processes();
    match sys.process(Pid::from_u32(pid)) {
        Some(process) if !process.kill() => Err(ProcessError::KillFailed {
            pid,
            reason: "kill request rejected".to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;
    use tokio::process::Command;

    // Unique per test binary run so parallel runs do not see each other
    fn marker() -> String {
        format!("{}", 40_000 + std::process::id() % 10_000)
    }

    #[tokio::test]
    async fn test_find_and_kill_process_by_argument() {
        let marker = marker();
        let mut child = Command::new("sleep")
            .arg(&marker)
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let expected = child.id().unwrap();
        let monitor = SysinfoProcessMonitor::new();
        let query = ProcessQuery::new("sleep", marker.clone());

        let found = monitor.find_pid(&query).await.unwrap();
        assert_eq!(found, Some(expected));

        monitor.kill(expected).await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());

        assert_eq!(monitor.find_pid(&query).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_match_returns_none() {
        let monitor = SysinfoProcessMonitor::new();
        let query = ProcessQuery::new("soffice", "socket,host=nowhere,port=1;urp;");

        assert_eq!(monitor.find_pid(&query).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_kill_missing_pid_is_ok() {
        let monitor = SysinfoProcessMonitor::new();
        // Above PID_MAX_LIMIT
        assert!(monitor.kill(99_999_999).await.is_ok());
    }
}
