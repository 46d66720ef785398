// Central Error Type for the Office Pool

use std::time::Duration;
use thiserror::Error;

/// Application-level error type
///
/// Process-level failures are recovered by restarting the process; only the
/// task-level kinds below ever reach a caller of `OfficeManagerPool::execute`.
#[derive(Error, Debug)]
pub enum OfficeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::domain::DomainError),

    #[error("Process start failed: {0}")]
    ProcessStart(String),

    #[error("Task timed out after {}ms", .0.as_millis())]
    TaskTimeout(Duration),

    #[error("Task waited in queue longer than {}ms", .0.as_millis())]
    QueueTimeout(Duration),

    #[error("Office process crashed: {0}")]
    ProcessCrash(String),

    #[error("Office process unavailable: {0}")]
    ProcessUnavailable(String),

    #[error("Task failed: {0}")]
    Task(#[from] crate::port::ConnectionError),

    #[error("Process error: {0}")]
    Process(#[from] crate::port::ProcessError),

    #[error("Office pool is not running")]
    PoolNotRunning,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OfficeError {
    /// Errors a caller may reasonably retry later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OfficeError::ProcessUnavailable(_)
                | OfficeError::QueueTimeout(_)
                | OfficeError::ProcessCrash(_)
        )
    }
}

/// Result type alias using OfficeError
pub type Result<T> = std::result::Result<T, OfficeError>;
