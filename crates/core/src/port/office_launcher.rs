// Office Launcher Port
// Abstraction for starting one office process bound to one endpoint

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::ConnectionEndpoint;
use crate::port::process_monitor::ProcessError;

/// Everything needed to start one office process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub office_home: PathBuf,
    pub endpoint: ConnectionEndpoint,
    /// Per-entry user profile directory, created by the launcher
    pub instance_profile_dir: PathBuf,
    /// Copied into the instance profile dir before the first launch
    pub template_profile_dir: Option<PathBuf>,
    /// Prefix command (e.g. `sudo -u office`)
    pub run_as_args: Vec<String>,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// None when terminated by a signal
    pub code: Option<i32>,
}

/// Exit code office uses to ask for a relaunch after initialising a new profile
pub const RESTART_REQUIRED_EXIT_CODE: i32 = 81;

impl ProcessExit {
    pub fn restart_required(&self) -> bool {
        self.code == Some(RESTART_REQUIRED_EXIT_CODE)
    }
}

/// Handle to a launched office process
#[async_trait]
pub trait OfficeProcess: Send + Sync {
    /// OS process id, if still known
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check
    fn try_exit(&mut self) -> Result<Option<ProcessExit>, ProcessError>;

    /// Wait for the process to exit on its own, up to `timeout`
    async fn wait_for_exit(&mut self, timeout: Duration) -> Option<ProcessExit>;

    /// Forcefully terminate the process and reap it
    async fn kill(&mut self) -> Result<(), ProcessError>;
}

/// Office launcher trait
///
/// Implementations:
/// - SubprocessOfficeLauncher: spawns `soffice` through tokio::process
/// - MockOffice: in-memory fake for tests
#[async_trait]
pub trait OfficeLauncher: Send + Sync {
    /// Prepare the instance profile and start the process
    ///
    /// # Errors
    /// - ProcessError::LaunchFailed if the executable cannot be spawned
    /// - ProcessError::IoError if the profile directory cannot be prepared
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn OfficeProcess>, ProcessError>;
}
