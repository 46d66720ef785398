// Application Layer - Supervision and dispatch services

pub mod entry;
pub mod lifecycle;
pub mod pool;
pub mod supervisor;

// Re-exports
pub use entry::{EntrySnapshot, TaskQueueEntry};
pub use lifecycle::OfficeService;
pub use pool::OfficeManagerPool;
pub use supervisor::{
    shutdown_channel, OfficeAdapters, ProcessSettings, ProcessSupervisor, ShutdownSender,
    ShutdownToken, SupervisorSnapshot,
};
