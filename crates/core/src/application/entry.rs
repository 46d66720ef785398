// Task Queue Entry - single-slot executor around one process supervisor

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::application::supervisor::constants::SUPERVISION_JOIN_TIMEOUT;
use crate::application::supervisor::{
    shutdown_channel, OfficeAdapters, ProcessSettings, ProcessSupervisor, ShutdownSender,
    ShutdownToken, SupervisorSnapshot,
};
use crate::domain::{Configuration, ConnectionEndpoint, ProcessState, Task, TaskOutput};
use crate::error::{OfficeError, Result};

/// State guarded by the execution lock
#[derive(Debug, Default)]
struct ExecutionState {
    /// Restart to perform before the slot is handed to the next task
    pending_restart: Option<String>,
}

/// Immutable view of an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub index: usize,
    pub task_execution_timeout: Duration,
    pub max_tasks_per_process: u32,
    pub tasks_completed: u32,
    pub available: bool,
    pub supervisor: SupervisorSnapshot,
}

type Supervision = (ShutdownSender, JoinHandle<()>);

/// One pool entry: one supervisor, one execution slot, one task counter
pub struct TaskQueueEntry {
    index: usize,
    supervisor: Arc<ProcessSupervisor>,
    task_execution_timeout: Duration,
    max_tasks_per_process: u32,
    health_check_interval: Duration,
    busy: AtomicBool,
    execution: Arc<Mutex<ExecutionState>>,
    tasks_completed: AtomicU32,
    supervision: StdMutex<Option<Supervision>>,
    /// Bumped each time the supervision loop hands the slot back
    freed: watch::Sender<u64>,
}

impl TaskQueueEntry {
    pub fn new(
        index: usize,
        config: &Configuration,
        endpoint: ConnectionEndpoint,
        adapters: OfficeAdapters,
    ) -> Self {
        let settings = ProcessSettings::from_config(config, &endpoint);
        let (freed, _) = watch::channel(0);
        Self {
            index,
            supervisor: Arc::new(ProcessSupervisor::new(endpoint, settings, adapters)),
            task_execution_timeout: config.task_execution_timeout(),
            max_tasks_per_process: config.max_tasks_per_process(),
            health_check_interval: config.health_check_interval(),
            busy: AtomicBool::new(false),
            execution: Arc::new(Mutex::new(ExecutionState::default())),
            tasks_completed: AtomicU32::new(0),
            supervision: StdMutex::new(None),
            freed,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn tasks_completed(&self) -> u32 {
        self.tasks_completed.load(Ordering::SeqCst)
    }

    /// Nothing holds the slot and the process is running
    pub fn is_available(&self) -> bool {
        !self.busy.load(Ordering::SeqCst) && self.is_running()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.state().accepts_tasks()
    }

    /// Reserve the slot; false if a task or the supervision loop holds it
    pub fn try_claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Reserve the slot only if the process is running
    ///
    /// The state cannot leave `Running` while the slot is held, so a claim
    /// that succeeds here stays on a live process until released.
    pub fn try_claim_running(&self) -> bool {
        if !self.try_claim() {
            return false;
        }
        if self.is_running() {
            return true;
        }
        self.release();
        false
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Changes each time a background start or health check gives the slot back
    pub fn watch_freed(&self) -> watch::Receiver<u64> {
        self.freed.subscribe()
    }

    fn release_from_supervision(&self) {
        self.release();
        self.freed.send_modify(|n| *n = n.wrapping_add(1));
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            index: self.index,
            task_execution_timeout: self.task_execution_timeout,
            max_tasks_per_process: self.max_tasks_per_process,
            tasks_completed: self.tasks_completed(),
            available: self.is_available(),
            supervisor: self.supervisor.snapshot(),
        }
    }

    /// Start the supervisor and the supervision loop
    ///
    /// With `start_fail_fast` the first start runs here and its error is
    /// returned. Otherwise the start runs in the background while holding the
    /// slot and the execution lock, so the pool queues early tasks instead of
    /// dispatching them to a process that is not up yet.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let started = self.lock_supervision().is_some();
        if started {
            return Err(OfficeError::InvalidState(format!(
                "entry {} already started",
                self.index
            )));
        }

        let initial = if self.supervisor.settings().start_fail_fast {
            self.supervisor.start().await?;
            None
        } else {
            self.busy.store(true, Ordering::SeqCst);
            Some(Arc::clone(&self.execution).lock_owned().await)
        };

        let (tx, token) = shutdown_channel();
        let entry = Arc::clone(self);
        let handle = tokio::spawn(async move { entry.supervise(token, initial).await });
        *self.lock_supervision() = Some((tx, handle));

        info!(entry = self.index, endpoint = %self.supervisor.endpoint(), "Entry started");
        Ok(())
    }

    /// Stop the supervision loop, wait for the running task, stop the process
    pub async fn stop(&self) {
        let supervision = self.lock_supervision().take();
        if let Some((tx, mut handle)) = supervision {
            tx.shutdown();
            if timeout(SUPERVISION_JOIN_TIMEOUT, &mut handle).await.is_err() {
                warn!(entry = self.index, "Supervision loop did not stop in time, aborting");
                handle.abort();
            }
        }

        let guard = timeout(self.task_execution_timeout, self.execution.lock())
            .await
            .ok();
        if guard.is_none() {
            warn!(entry = self.index, "Running task did not finish before shutdown");
        }
        self.supervisor.stop().await;
        info!(entry = self.index, "Entry stopped");
    }

    /// Run one task and settle the entry before returning
    pub async fn submit(&self, task: &Task) -> Result<TaskOutput> {
        let mut state = self.execution.lock().await;
        let result = self.run_locked(&mut state, task).await;
        self.settle_locked(&mut state).await;
        result
    }

    /// Run one task on behalf of the pool, replying through `reply`
    ///
    /// If the caller goes away while the task is running, the in-flight
    /// conversion is abandoned and the process is restarted.
    pub async fn dispatch(&self, task: Task, mut reply: oneshot::Sender<Result<TaskOutput>>) {
        let mut state = tokio::select! {
            state = self.execution.lock() => state,
            _ = reply.closed() => {
                debug!(entry = self.index, task_id = %task.id, "Task cancelled before it started");
                return;
            }
        };

        let outcome = tokio::select! {
            result = self.run_locked(&mut state, &task) => Some(result),
            _ = reply.closed() => None,
        };

        match outcome {
            Some(result) => {
                // Receiver may be gone already; nothing to do then
                let _ = reply.send(result);
            }
            None => {
                warn!(entry = self.index, task_id = %task.id, "Task cancelled while running");
                state.pending_restart = Some(format!("task {} cancelled", task.id));
            }
        }

        self.settle_locked(&mut state).await;
    }

    async fn run_locked(&self, state: &mut ExecutionState, task: &Task) -> Result<TaskOutput> {
        let connection = self.supervisor.connection().await?;
        debug!(entry = self.index, task_id = %task.id, "Executing task");

        match timeout(self.task_execution_timeout, connection.execute(task)).await {
            Ok(Ok(output)) => {
                self.count_completed(state);
                Ok(output)
            }
            Ok(Err(e)) if e.is_fatal() => {
                error!(entry = self.index, task_id = %task.id, error = %e, "Connection lost during task");
                state.pending_restart = Some(format!("connection lost: {}", e));
                Err(OfficeError::ProcessCrash(e.to_string()))
            }
            Ok(Err(e)) => {
                warn!(entry = self.index, task_id = %task.id, error = %e, "Task failed");
                self.count_completed(state);
                Err(e.into())
            }
            Err(_) => {
                error!(
                    entry = self.index,
                    task_id = %task.id,
                    timeout_ms = self.task_execution_timeout.as_millis() as u64,
                    "Task timed out"
                );
                state.pending_restart = Some(format!("task {} timed out", task.id));
                Err(OfficeError::TaskTimeout(self.task_execution_timeout))
            }
        }
    }

    fn count_completed(&self, state: &mut ExecutionState) {
        let completed = self.tasks_completed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.max_tasks_per_process > 0 && completed >= self.max_tasks_per_process {
            info!(entry = self.index, completed, "Task limit reached, recycling process");
            state
                .pending_restart
                .get_or_insert_with(|| format!("{} tasks completed", completed));
        }
    }

    async fn settle_locked(&self, state: &mut ExecutionState) {
        let Some(reason) = state.pending_restart.take() else {
            return;
        };
        self.tasks_completed.store(0, Ordering::SeqCst);
        if let Err(e) = self.supervisor.restart(&reason).await {
            // The supervision loop retries a failed process
            error!(entry = self.index, error = %e, "Restart failed");
        }
    }

    async fn supervise(
        self: Arc<Self>,
        mut shutdown: ShutdownToken,
        initial: Option<OwnedMutexGuard<ExecutionState>>,
    ) {
        if let Some(guard) = initial {
            tokio::select! {
                result = self.supervisor.start() => {
                    if let Err(e) = result {
                        warn!(entry = self.index, error = %e, "Background start failed, will retry");
                    }
                }
                _ = shutdown.wait() => {
                    drop(guard);
                    self.release_from_supervision();
                    return;
                }
            }
            drop(guard);
            self.release_from_supervision();
        }

        loop {
            tokio::select! {
                _ = sleep(self.health_check_interval) => {},
                _ = shutdown.wait() => {
                    debug!(entry = self.index, "Supervision loop stopping");
                    break;
                }
            }

            // A task owns the process right now; check again later
            if !self.try_claim() {
                continue;
            }
            let Ok(guard) = self.execution.try_lock() else {
                self.release_from_supervision();
                continue;
            };

            let reason = match self.supervisor.state() {
                ProcessState::Failed => Some("process failed"),
                ProcessState::Running => {
                    if self.supervisor.health_check().await {
                        None
                    } else {
                        Some("health check failed")
                    }
                }
                _ => None,
            };

            if let Some(reason) = reason {
                self.tasks_completed.store(0, Ordering::SeqCst);
                if let Err(e) = self.supervisor.restart(reason).await {
                    warn!(entry = self.index, error = %e, "Recovery attempt failed");
                }
            }
            drop(guard);
            self.release_from_supervision();
        }
    }

    fn lock_supervision(&self) -> std::sync::MutexGuard<'_, Option<Supervision>> {
        match self.supervision.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
