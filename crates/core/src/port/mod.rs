// Port Layer - Interfaces for external collaborators

pub mod id_provider;
pub mod mocks;
pub mod office_connector;
pub mod office_launcher;
pub mod process_monitor;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use office_connector::{ConnectionError, OfficeConnection, OfficeConnector};
pub use office_launcher::{LaunchSpec, OfficeLauncher, OfficeProcess, ProcessExit};
pub use process_monitor::{ProcessError, ProcessMonitor, ProcessQuery};
pub use time_provider::TimeProvider;
