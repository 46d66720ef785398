// Office Connector Port
// Bridge connection to a running office process; conversion happens behind it

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{ConnectionEndpoint, Task, TaskOutput};

/// Connection errors
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Conversion failed: {0}")]
    TaskFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl ConnectionError {
    /// The process behind the connection can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::Disconnected(_) | ConnectionError::IoError(_)
        )
    }
}

/// A live bridge to one office process
#[async_trait]
pub trait OfficeConnection: Send + Sync {
    /// Run one task through the process
    async fn execute(&self, task: &Task) -> Result<TaskOutput, ConnectionError>;

    /// Cheap liveness probe used by health checks
    async fn is_alive(&self) -> bool;

    /// Ask the office process to shut itself down
    async fn terminate(&self) -> Result<(), ConnectionError>;

    /// Release the connection without touching the process
    async fn close(&self);
}

/// Office connector trait
#[async_trait]
pub trait OfficeConnector: Send + Sync {
    /// Open a bridge connection to `endpoint`
    ///
    /// # Errors
    /// - ConnectionError::Refused while nothing accepts on the endpoint
    async fn connect(
        &self,
        endpoint: &ConnectionEndpoint,
    ) -> Result<Arc<dyn OfficeConnection>, ConnectionError>;
}
