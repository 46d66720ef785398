// Officepool Infrastructure - System Adapters
// Implements: ProcessMonitor, OfficeLauncher, OfficeConnector

pub mod office_connector_impl;
pub mod office_launcher_impl;
pub mod process_monitor_impl;

pub use office_connector_impl::{pipe_path, BridgeConnection, BridgeConnector};
pub use office_launcher_impl::{OfficeChild, SubprocessOfficeLauncher};
pub use process_monitor_impl::SysinfoProcessMonitor;

use officepool_core::application::OfficeAdapters;
use std::sync::Arc;

/// Production adapters: sysinfo process table, `soffice` subprocesses, bridge connector
pub fn system_adapters() -> OfficeAdapters {
    OfficeAdapters::new(
        Arc::new(SysinfoProcessMonitor::new()),
        Arc::new(SubprocessOfficeLauncher::new()),
        Arc::new(BridgeConnector::new()),
    )
}
