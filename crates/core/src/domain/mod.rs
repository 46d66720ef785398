// Domain Layer - Pure value types (endpoints, configuration, process state, tasks)

pub mod config;
pub mod endpoint;
pub mod error;
pub mod process;
pub mod task;

// Re-exports
pub use config::{defaults, Configuration, ConfigurationBuilder, ExistingProcessAction};
pub use endpoint::ConnectionEndpoint;
pub use error::DomainError;
pub use process::ProcessState;
pub use task::{Task, TaskId, TaskOutput, TaskPayload};
