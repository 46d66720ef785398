// Office Service - initialize/shutdown surface for the wiring layer

use tokio::sync::Mutex;
use tracing::info;

use crate::application::pool::OfficeManagerPool;
use crate::application::supervisor::OfficeAdapters;
use crate::domain::{ConfigurationBuilder, Task, TaskOutput};
use crate::error::{OfficeError, Result};

enum ServiceState {
    Uninitialized(ConfigurationBuilder),
    Initialized(OfficeManagerPool),
    ShutDown,
}

/// Owns the pool from `initialize()` until `shutdown()`
pub struct OfficeService {
    adapters: OfficeAdapters,
    state: Mutex<ServiceState>,
}

impl OfficeService {
    pub fn new(builder: ConfigurationBuilder, adapters: OfficeAdapters) -> Self {
        Self {
            adapters,
            state: Mutex::new(ServiceState::Uninitialized(builder)),
        }
    }

    /// Build the configuration, create the pool and start it
    ///
    /// No-op when already initialized.
    ///
    /// # Errors
    /// - OfficeError::Configuration if the builder rejects the settings
    /// - the pool start error under `start_fail_fast`
    /// - OfficeError::InvalidState after `shutdown()`
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let builder = match &*state {
            ServiceState::Initialized(_) => return Ok(()),
            ServiceState::ShutDown => {
                return Err(OfficeError::InvalidState(
                    "service was shut down".to_string(),
                ))
            }
            ServiceState::Uninitialized(builder) => builder.clone(),
        };

        let config = builder.build()?;
        let pool = OfficeManagerPool::new(&config, self.adapters.clone());
        pool.start().await?;

        info!(
            entries = pool.entries().len(),
            temp_dir = %pool.temp_dir().display(),
            "Office service initialized"
        );
        *state = ServiceState::Initialized(pool);
        Ok(())
    }

    /// Stop the pool; safe before `initialize()` and when called twice
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let ServiceState::Initialized(pool) =
            std::mem::replace(&mut *state, ServiceState::ShutDown)
        {
            pool.stop().await;
            info!("Office service shut down");
        }
    }

    /// The running pool, if initialized
    pub async fn pool(&self) -> Option<OfficeManagerPool> {
        match &*self.state.lock().await {
            ServiceState::Initialized(pool) => Some(pool.clone()),
            _ => None,
        }
    }

    pub async fn is_initialized(&self) -> bool {
        matches!(&*self.state.lock().await, ServiceState::Initialized(_))
    }

    /// Execute a task on the running pool
    pub async fn execute(&self, task: Task) -> Result<TaskOutput> {
        let pool = self.pool().await.ok_or(OfficeError::PoolNotRunning)?;
        pool.execute(task).await
    }
}
