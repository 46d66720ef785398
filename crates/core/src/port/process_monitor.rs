// Process Monitor Port
// Finds and terminates office processes left over from a previous run

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ConnectionEndpoint;

/// Executable name every office install ships
pub const OFFICE_EXECUTABLE: &str = "soffice";

/// Command-line signature of an office process bound to one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessQuery {
    /// Substring of the executable name
    pub command: String,
    /// Substring of one command-line argument
    pub argument: String,
}

impl ProcessQuery {
    pub fn new(command: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            argument: argument.into(),
        }
    }

    /// Signature of the office process accepting connections on `endpoint`
    pub fn for_endpoint(endpoint: &ConnectionEndpoint) -> Self {
        Self::new(OFFICE_EXECUTABLE, endpoint.accept_argument())
    }

    /// Whether a process with this name and argument list matches
    pub fn matches(&self, name: &str, args: &[String]) -> bool {
        let name_matches = name.contains(&self.command)
            || args
                .first()
                .map(|exe| exe.contains(&self.command))
                .unwrap_or(false);
        name_matches && args.iter().any(|arg| arg.contains(&self.argument))
    }
}

/// Process-level errors
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Kill failed for pid {pid}: {reason}")]
    KillFailed { pid: u32, reason: String },

    #[error("Process table scan failed: {0}")]
    ScanFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Process monitor trait
///
/// Stateless and shared by every supervisor of a pool.
///
/// Implementations:
/// - SysinfoProcessMonitor: process table scan + signals
/// - MockOffice: in-memory fake for tests
#[async_trait]
pub trait ProcessMonitor: Send + Sync {
    /// Find the pid of a running process matching `query`
    async fn find_pid(&self, query: &ProcessQuery) -> Result<Option<u32>, ProcessError>;

    /// Forcefully terminate a process
    ///
    /// # Errors
    /// - ProcessError::KillFailed if the signal cannot be delivered
    async fn kill(&self, pid: u32) -> Result<(), ProcessError>;
}
