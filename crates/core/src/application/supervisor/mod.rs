// Process Supervisor - lifecycle of exactly one office process

pub mod constants;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use constants::MAX_RESTART_REQUIRED_RELAUNCHES;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::domain::{Configuration, ConnectionEndpoint, ExistingProcessAction, ProcessState};
use crate::error::{OfficeError, Result};
use crate::port::{
    LaunchSpec, OfficeConnection, OfficeConnector, OfficeLauncher, OfficeProcess, ProcessExit,
    ProcessMonitor, ProcessQuery,
};

/// External collaborators shared by every supervisor of a pool
#[derive(Clone)]
pub struct OfficeAdapters {
    pub monitor: Arc<dyn ProcessMonitor>,
    pub launcher: Arc<dyn OfficeLauncher>,
    pub connector: Arc<dyn OfficeConnector>,
}

impl OfficeAdapters {
    pub fn new(
        monitor: Arc<dyn ProcessMonitor>,
        launcher: Arc<dyn OfficeLauncher>,
        connector: Arc<dyn OfficeConnector>,
    ) -> Self {
        Self {
            monitor,
            launcher,
            connector,
        }
    }
}

/// Per-process settings, derived from the pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSettings {
    pub office_home: PathBuf,
    pub instance_profile_dir: PathBuf,
    pub template_profile_dir: Option<PathBuf>,
    pub run_as_args: Vec<String>,
    pub process_timeout: Duration,
    pub process_retry_interval: Duration,
    pub after_start_process_delay: Duration,
    pub existing_process_action: ExistingProcessAction,
    pub start_fail_fast: bool,
    pub keep_alive_on_shutdown: bool,
}

impl ProcessSettings {
    pub fn from_config(config: &Configuration, endpoint: &ConnectionEndpoint) -> Self {
        Self {
            office_home: config.office_home().to_path_buf(),
            instance_profile_dir: config.temp_dir().join(endpoint.profile_dir_name()),
            template_profile_dir: config.template_profile_dir().map(|p| p.to_path_buf()),
            run_as_args: config.run_as_args().to_vec(),
            process_timeout: config.process_timeout(),
            process_retry_interval: config.process_retry_interval(),
            after_start_process_delay: config.after_start_process_delay(),
            existing_process_action: config.existing_process_action(),
            start_fail_fast: config.start_fail_fast(),
            keep_alive_on_shutdown: config.keep_alive_on_shutdown(),
        }
    }
}

/// Immutable view of a supervisor, for tests and diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSnapshot {
    pub endpoint: ConnectionEndpoint,
    pub connect_string: String,
    pub settings: ProcessSettings,
    pub state: ProcessState,
    /// Restarts of a running process; retries of a failed start are not counted
    pub restarts: u64,
    pub pid: Option<u32>,
}

#[derive(Default)]
struct Inner {
    process: Option<Box<dyn OfficeProcess>>,
    connection: Option<Arc<dyn OfficeConnection>>,
}

/// How a running process is let go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseMode {
    /// Close the connection, leave the process running
    KeepAlive,
    /// Ask office to exit, force-kill after `process_timeout`
    Terminate,
    /// Force-kill right away
    Kill,
}

/// Why a connect loop gave up
enum ConnectFailure {
    Exited(ProcessExit),
    TimedOut,
    Error(OfficeError),
}

/// Supervises one office process bound to one endpoint
///
/// State machine: Stopped -> Starting -> Running -> Restarting -> Running,
/// with Failed reachable from Starting/Restarting. All transitions happen under
/// the `inner` lock; observers read the state through a watch channel.
pub struct ProcessSupervisor {
    endpoint: ConnectionEndpoint,
    settings: ProcessSettings,
    adapters: OfficeAdapters,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ProcessState>,
    restarts: AtomicU64,
    pid: AtomicU32, // 0 = no pid known
}

impl ProcessSupervisor {
    pub fn new(
        endpoint: ConnectionEndpoint,
        settings: ProcessSettings,
        adapters: OfficeAdapters,
    ) -> Self {
        let (state_tx, _) = watch::channel(ProcessState::Stopped);
        Self {
            endpoint,
            settings,
            adapters,
            inner: Mutex::new(Inner::default()),
            state_tx,
            restarts: AtomicU64::new(0),
            pid: AtomicU32::new(0),
        }
    }

    pub fn endpoint(&self) -> &ConnectionEndpoint {
        &self.endpoint
    }

    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    pub fn state(&self) -> ProcessState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state_tx.subscribe()
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            endpoint: self.endpoint.clone(),
            connect_string: self.endpoint.connect_string(),
            settings: self.settings.clone(),
            state: self.state(),
            restarts: self.restart_count(),
            pid: self.pid(),
        }
    }

    fn set_state(&self, to: ProcessState) {
        let from = self.state();
        if from == to {
            return;
        }
        if let Err(e) = from.transition(to) {
            warn!(endpoint = %self.endpoint, error = %e, "Unexpected process state transition");
        }
        debug!(endpoint = %self.endpoint, from = %from, to = %to, "Process state changed");
        self.state_tx.send_replace(to);
    }

    /// Start the process and connect to it
    ///
    /// No-op when already running.
    ///
    /// # Errors
    /// - OfficeError::ProcessStart if an existing process blocks the endpoint
    ///   (action `Fail`), the launch fails, or no connection is made within
    ///   `process_timeout`
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.state() == ProcessState::Running && inner.connection.is_some() {
            return Ok(());
        }

        info!(endpoint = %self.endpoint, "Starting office process");
        self.set_state(ProcessState::Starting);
        self.finish_start(&mut inner).await
    }

    /// Forcefully kill the process and start it again
    ///
    /// Counts as a restart only when the process was running.
    pub async fn restart(&self, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.state() == ProcessState::Stopped {
            return Err(OfficeError::InvalidState(format!(
                "cannot restart stopped process on {}",
                self.endpoint
            )));
        }

        warn!(endpoint = %self.endpoint, reason = %reason, "Restarting office process");
        if self.state() == ProcessState::Running {
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }
        self.set_state(ProcessState::Restarting);
        self.release(&mut inner, ReleaseMode::Kill).await;
        self.finish_start(&mut inner).await
    }

    /// Release the process
    ///
    /// With `keep_alive_on_shutdown` only the connection is closed; otherwise
    /// the process is asked to terminate and killed if it does not exit in time.
    /// Idempotent.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if self.state() == ProcessState::Stopped
            && inner.process.is_none()
            && inner.connection.is_none()
        {
            return;
        }

        let mode = if self.settings.keep_alive_on_shutdown {
            ReleaseMode::KeepAlive
        } else {
            ReleaseMode::Terminate
        };
        info!(endpoint = %self.endpoint, mode = ?mode, "Stopping office process");
        self.release(&mut inner, mode).await;
        self.set_state(ProcessState::Stopped);
    }

    /// Live connection, or a transient error while the process is not running
    pub async fn connection(&self) -> Result<Arc<dyn OfficeConnection>> {
        let inner = self.inner.lock().await;
        match (self.state(), &inner.connection) {
            (ProcessState::Running, Some(connection)) => Ok(Arc::clone(connection)),
            (state, _) => Err(OfficeError::ProcessUnavailable(format!(
                "office process on {} is {}",
                self.endpoint, state
            ))),
        }
    }

    /// True if the process is running and answers on its connection
    pub async fn health_check(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if self.state() != ProcessState::Running {
            return false;
        }

        if let Some(process) = inner.process.as_mut() {
            match process.try_exit() {
                Ok(Some(exit)) => {
                    warn!(endpoint = %self.endpoint, exit_code = ?exit.code, "Office process exited unexpectedly");
                    return false;
                }
                Ok(None) => {}
                Err(e) => debug!(endpoint = %self.endpoint, error = %e, "Exit check failed"),
            }
        }

        match &inner.connection {
            Some(connection) => connection.is_alive().await,
            None => false,
        }
    }

    async fn finish_start(&self, inner: &mut Inner) -> Result<()> {
        match self.start_process(inner).await {
            Ok(()) => {
                self.set_state(ProcessState::Running);
                info!(endpoint = %self.endpoint, pid = ?self.pid(), "Office process running");
                Ok(())
            }
            Err(e) => {
                self.set_state(ProcessState::Failed);
                error!(endpoint = %self.endpoint, error = %e, "Office process failed to start");
                Err(e)
            }
        }
    }

    async fn start_process(&self, inner: &mut Inner) -> Result<()> {
        let query = ProcessQuery::for_endpoint(&self.endpoint);
        let existing = self
            .adapters
            .monitor
            .find_pid(&query)
            .await
            .map_err(|e| OfficeError::ProcessStart(e.to_string()))?;

        if let Some(pid) = existing {
            match self.settings.existing_process_action {
                ExistingProcessAction::Fail => {
                    return Err(OfficeError::ProcessStart(format!(
                        "a process accepting '{}' is already running; pid {}",
                        query.argument, pid
                    )));
                }
                ExistingProcessAction::Connect => {
                    info!(endpoint = %self.endpoint, pid, "Connecting to existing office process");
                    let connection = self
                        .connect_with_retry(None)
                        .await
                        .map_err(|f| self.start_error(f))?;
                    inner.connection = Some(connection);
                    self.pid.store(pid, Ordering::SeqCst);
                    return Ok(());
                }
                ExistingProcessAction::ConnectOrKill => {
                    match self.adapters.connector.connect(&self.endpoint).await {
                        Ok(connection) => {
                            info!(endpoint = %self.endpoint, pid, "Reusing existing office process");
                            inner.connection = Some(connection);
                            self.pid.store(pid, Ordering::SeqCst);
                            return Ok(());
                        }
                        Err(e) => {
                            warn!(endpoint = %self.endpoint, pid, error = %e, "Existing office process unreachable, killing it");
                            self.kill_existing(pid, &query).await?;
                        }
                    }
                }
                ExistingProcessAction::Kill => {
                    warn!(endpoint = %self.endpoint, pid, "Killing existing office process");
                    self.kill_existing(pid, &query).await?;
                }
            }
        }

        self.launch_and_connect(inner).await
    }

    async fn launch_and_connect(&self, inner: &mut Inner) -> Result<()> {
        let spec = LaunchSpec {
            office_home: self.settings.office_home.clone(),
            endpoint: self.endpoint.clone(),
            instance_profile_dir: self.settings.instance_profile_dir.clone(),
            template_profile_dir: self.settings.template_profile_dir.clone(),
            run_as_args: self.settings.run_as_args.clone(),
        };

        let mut relaunches = 0;
        loop {
            let process = self
                .adapters
                .launcher
                .launch(&spec)
                .await
                .map_err(|e| OfficeError::ProcessStart(e.to_string()))?;
            self.pid.store(process.pid().unwrap_or(0), Ordering::SeqCst);
            info!(endpoint = %self.endpoint, pid = ?process.pid(), "Office process launched");
            inner.process = Some(process);

            if !self.settings.after_start_process_delay.is_zero() {
                sleep(self.settings.after_start_process_delay).await;
            }

            match self.connect_with_retry(inner.process.as_mut()).await {
                Ok(connection) => {
                    inner.connection = Some(connection);
                    return Ok(());
                }
                Err(ConnectFailure::Exited(exit))
                    if exit.restart_required() && relaunches < MAX_RESTART_REQUIRED_RELAUNCHES =>
                {
                    relaunches += 1;
                    info!(endpoint = %self.endpoint, "Office asked for a restart, relaunching");
                    inner.process = None;
                    self.pid.store(0, Ordering::SeqCst);
                }
                Err(failure) => {
                    self.release(inner, ReleaseMode::Kill).await;
                    return Err(self.start_error(failure));
                }
            }
        }
    }

    /// Connect every `process_retry_interval` until `process_timeout` elapses
    async fn connect_with_retry(
        &self,
        mut process: Option<&mut Box<dyn OfficeProcess>>,
    ) -> std::result::Result<Arc<dyn OfficeConnection>, ConnectFailure> {
        let attempts = async {
            let mut attempt: u32 = 0;
            loop {
                if let Some(process) = process.as_mut() {
                    match process.try_exit() {
                        Ok(Some(exit)) => return Err(ConnectFailure::Exited(exit)),
                        Ok(None) => {}
                        Err(e) => return Err(ConnectFailure::Error(e.into())),
                    }
                }

                attempt += 1;
                match self.adapters.connector.connect(&self.endpoint).await {
                    Ok(connection) => {
                        debug!(endpoint = %self.endpoint, attempt, "Connected to office process");
                        return Ok(connection);
                    }
                    Err(e) => {
                        debug!(endpoint = %self.endpoint, attempt, error = %e, "Connection attempt failed");
                        sleep(self.settings.process_retry_interval).await;
                    }
                }
            }
        };

        match timeout(self.settings.process_timeout, attempts).await {
            Ok(result) => result,
            Err(_) => Err(ConnectFailure::TimedOut),
        }
    }

    fn start_error(&self, failure: ConnectFailure) -> OfficeError {
        match failure {
            ConnectFailure::Exited(exit) => OfficeError::ProcessStart(format!(
                "office process on {} exited during start with code {:?}",
                self.endpoint, exit.code
            )),
            ConnectFailure::TimedOut => OfficeError::ProcessStart(format!(
                "could not connect to {} within {}ms",
                self.endpoint,
                self.settings.process_timeout.as_millis()
            )),
            ConnectFailure::Error(e) => OfficeError::ProcessStart(e.to_string()),
        }
    }

    /// Kill a stale process and wait until the process table no longer lists it
    async fn kill_existing(&self, pid: u32, query: &ProcessQuery) -> Result<()> {
        self.adapters
            .monitor
            .kill(pid)
            .await
            .map_err(|e| OfficeError::ProcessStart(e.to_string()))?;

        let gone = async {
            loop {
                match self.adapters.monitor.find_pid(query).await {
                    Ok(None) => return,
                    Ok(Some(_)) | Err(_) => sleep(self.settings.process_retry_interval).await,
                }
            }
        };
        timeout(self.settings.process_timeout, gone)
            .await
            .map_err(|_| {
                OfficeError::ProcessStart(format!(
                    "existing process {} on {} did not exit after kill",
                    pid, self.endpoint
                ))
            })
    }

    async fn release(&self, inner: &mut Inner, mode: ReleaseMode) {
        let connection = inner.connection.take();

        if mode == ReleaseMode::KeepAlive {
            if let Some(connection) = connection {
                connection.close().await;
            }
            // Dropping the handle does not kill the child
            inner.process = None;
            self.pid.store(0, Ordering::SeqCst);
            return;
        }

        if let Some(connection) = &connection {
            if mode == ReleaseMode::Terminate {
                if let Err(e) = connection.terminate().await {
                    debug!(endpoint = %self.endpoint, error = %e, "Terminate request failed");
                }
            }
            connection.close().await;
        }

        if let Some(mut process) = inner.process.take() {
            let exited = match mode {
                ReleaseMode::Terminate => process
                    .wait_for_exit(self.settings.process_timeout)
                    .await
                    .is_some(),
                _ => false,
            };
            if !exited {
                if let Err(e) = process.kill().await {
                    warn!(endpoint = %self.endpoint, error = %e, "Failed to kill office process");
                }
            }
        }
        self.pid.store(0, Ordering::SeqCst);

        // Reused processes have no handle; fall back to the process table
        let query = ProcessQuery::for_endpoint(&self.endpoint);
        if let Ok(Some(pid)) = self.adapters.monitor.find_pid(&query).await {
            debug!(endpoint = %self.endpoint, pid, "Killing leftover office process");
            if let Err(e) = self.adapters.monitor.kill(pid).await {
                warn!(endpoint = %self.endpoint, pid, error = %e, "Failed to kill leftover office process");
            }
        }
    }
}
