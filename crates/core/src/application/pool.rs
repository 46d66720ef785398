// Office Manager Pool - dispatches tasks over N supervised entries

use futures::future::join_all;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::entry::{EntrySnapshot, TaskQueueEntry};
use crate::application::supervisor::OfficeAdapters;
use crate::domain::{Configuration, ProcessState, Task, TaskOutput, TaskPayload};
use crate::error::{OfficeError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{IdProvider, TimeProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    Created,
    Running,
    Stopped,
}

/// A caller waiting for an entry; receives the index of the handed-over entry
struct Waiter {
    id: u64,
    tx: oneshot::Sender<usize>,
}

struct DispatchState {
    state: PoolState,
    waiters: VecDeque<Waiter>,
}

struct PoolInner {
    entries: Vec<Arc<TaskQueueEntry>>,
    task_queue_timeout: Duration,
    temp_dir: PathBuf,
    keep_alive_on_shutdown: bool,
    dispatch: StdMutex<DispatchState>,
    next_waiter_id: AtomicU64,
    lifecycle: Mutex<()>,
    watchers: StdMutex<Vec<JoinHandle<()>>>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl PoolInner {
    fn lock_dispatch(&self) -> MutexGuard<'_, DispatchState> {
        match self.dispatch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim the first idle running entry; caller holds the dispatch lock
    fn claim_free(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.try_claim_running())
    }

    /// Pass a claimed entry to the oldest live waiter
    fn hand_over(dispatch: &mut DispatchState, index: usize) -> bool {
        while let Some(waiter) = dispatch.waiters.pop_front() {
            if waiter.tx.send(index).is_ok() {
                debug!(entry = index, waiter = waiter.id, "Entry handed to queued task");
                return true;
            }
        }
        false
    }

    /// Hand the entry to the oldest live waiter, or mark it idle
    ///
    /// An entry whose process is down is only marked idle; the watcher offers
    /// it again once the supervision loop has it running.
    fn release(&self, index: usize) {
        let entry = &self.entries[index];
        let mut dispatch = self.lock_dispatch();
        if entry.is_running() && Self::hand_over(&mut dispatch, index) {
            return;
        }
        entry.release();
    }

    /// Give an idle running entry to the queue, if anyone is waiting
    fn offer(&self, index: usize) {
        let entry = &self.entries[index];
        let mut dispatch = self.lock_dispatch();
        if dispatch.waiters.is_empty() || !entry.try_claim_running() {
            return;
        }
        if !Self::hand_over(&mut dispatch, index) {
            entry.release();
        }
    }

    /// Every process is down and retrying in the background
    fn all_failed(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.supervisor().state() == ProcessState::Failed)
    }

    fn lock_watchers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Offers an entry to queued tasks each time its supervision loop frees it
fn spawn_watcher(inner: Weak<PoolInner>, entry: &TaskQueueEntry) -> JoinHandle<()> {
    let index = entry.index();
    let mut freed = entry.watch_freed();
    tokio::spawn(async move {
        while freed.changed().await.is_ok() {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.offer(index);
        }
    })
}

/// Releases the entry once the dispatched task is done, even on panic
struct SlotGuard {
    inner: Arc<PoolInner>,
    index: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.release(self.index);
    }
}

/// A place in the wait list
///
/// Dropping the ticket (queue timeout, caller cancellation) removes the waiter.
/// If an entry was handed over in the meantime, it is passed on.
struct QueueTicket {
    inner: Arc<PoolInner>,
    id: u64,
    rx: oneshot::Receiver<usize>,
    redeemed: bool,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        if self.redeemed {
            return;
        }
        let handed = {
            let mut dispatch = self.inner.lock_dispatch();
            if let Some(pos) = dispatch.waiters.iter().position(|w| w.id == self.id) {
                dispatch.waiters.remove(pos);
                None
            } else {
                self.rx.try_recv().ok()
            }
        };
        if let Some(index) = handed {
            self.inner.release(index);
        }
    }
}

/// Pool of office processes behind a single task queue
#[derive(Clone)]
pub struct OfficeManagerPool {
    inner: Arc<PoolInner>,
}

impl OfficeManagerPool {
    /// One entry per configured endpoint, in configuration order
    pub fn new(config: &Configuration, adapters: OfficeAdapters) -> Self {
        Self::with_providers(
            config,
            adapters,
            Arc::new(UuidProvider),
            Arc::new(SystemTimeProvider),
        )
    }

    pub fn with_providers(
        config: &Configuration,
        adapters: OfficeAdapters,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let entries = config
            .endpoints()
            .into_iter()
            .enumerate()
            .map(|(index, endpoint)| {
                Arc::new(TaskQueueEntry::new(
                    index,
                    config,
                    endpoint,
                    adapters.clone(),
                ))
            })
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                entries,
                task_queue_timeout: config.task_queue_timeout(),
                temp_dir: config.temp_dir().to_path_buf(),
                keep_alive_on_shutdown: config.keep_alive_on_shutdown(),
                dispatch: StdMutex::new(DispatchState {
                    state: PoolState::Created,
                    waiters: VecDeque::new(),
                }),
                next_waiter_id: AtomicU64::new(1),
                lifecycle: Mutex::new(()),
                watchers: StdMutex::new(Vec::new()),
                id_provider,
                time_provider,
            }),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.inner.temp_dir
    }

    pub fn task_queue_timeout(&self) -> Duration {
        self.inner.task_queue_timeout
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_dispatch().state == PoolState::Running
    }

    /// Number of tasks waiting for an entry
    pub fn queued_tasks(&self) -> usize {
        self.inner.lock_dispatch().waiters.len()
    }

    pub fn entries(&self) -> Vec<EntrySnapshot> {
        self.inner.entries.iter().map(|e| e.snapshot()).collect()
    }

    /// Start every entry
    ///
    /// # Errors
    /// - OfficeError::InvalidState if the pool was started before
    /// - the first fail-fast start error; entries already started are stopped
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let state = self.inner.lock_dispatch().state;
        match state {
            PoolState::Created => {}
            PoolState::Running => {
                return Err(OfficeError::InvalidState("pool already running".to_string()))
            }
            PoolState::Stopped => {
                return Err(OfficeError::InvalidState(
                    "pool was stopped and cannot be restarted".to_string(),
                ))
            }
        }

        info!(
            entries = self.inner.entries.len(),
            temp_dir = %self.inner.temp_dir.display(),
            "Starting office pool"
        );

        // Subscribed before the entries start so no background start is missed
        let watchers: Vec<_> = self
            .inner
            .entries
            .iter()
            .map(|entry| spawn_watcher(Arc::downgrade(&self.inner), entry))
            .collect();
        *self.inner.lock_watchers() = watchers;

        for (position, entry) in self.inner.entries.iter().enumerate() {
            if let Err(e) = entry.start().await {
                error!(entry = entry.index(), error = %e, "Entry failed to start, stopping pool");
                self.abort_watchers();
                join_all(self.inner.entries[..=position].iter().map(|e| e.stop())).await;
                self.inner.lock_dispatch().state = PoolState::Stopped;
                self.remove_temp_dir().await;
                return Err(e);
            }
        }

        self.inner.lock_dispatch().state = PoolState::Running;
        info!("Office pool running");
        Ok(())
    }

    /// Stop every entry and fail queued tasks
    ///
    /// No-op unless running.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let waiters = {
            let mut dispatch = self.inner.lock_dispatch();
            if dispatch.state != PoolState::Running {
                return;
            }
            dispatch.state = PoolState::Stopped;
            std::mem::take(&mut dispatch.waiters)
        };
        if !waiters.is_empty() {
            warn!(count = waiters.len(), "Failing queued tasks on shutdown");
        }
        // Dropped senders wake their waiters with PoolNotRunning
        drop(waiters);

        info!("Stopping office pool");
        self.abort_watchers();
        join_all(self.inner.entries.iter().map(|e| e.stop())).await;

        if !self.inner.keep_alive_on_shutdown {
            self.remove_temp_dir().await;
        }
        info!("Office pool stopped");
    }

    /// Build a task with a fresh id and execute it
    pub async fn submit(&self, payload: TaskPayload) -> Result<TaskOutput> {
        let task = Task::new(
            self.inner.id_provider.generate_id(),
            self.inner.time_provider.now_millis(),
            payload,
        );
        self.execute(task).await
    }

    /// Execute a task on the first free entry with a running process
    ///
    /// # Errors
    /// - OfficeError::PoolNotRunning before `start()` or after `stop()`
    /// - OfficeError::ProcessUnavailable if every process failed to start and
    ///   is being retried in the background
    /// - OfficeError::QueueTimeout if no entry frees up within the queue timeout
    /// - any task-level error reported by the entry
    pub async fn execute(&self, task: Task) -> Result<TaskOutput> {
        let index = self.acquire(&task).await?;
        let entry = Arc::clone(&self.inner.entries[index]);
        let slot = SlotGuard {
            inner: Arc::clone(&self.inner),
            index,
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            entry.dispatch(task, tx).await;
            drop(slot);
        });

        rx.await.map_err(|_| {
            OfficeError::Internal(format!("entry {} dropped the task without a result", index))
        })?
    }

    async fn acquire(&self, task: &Task) -> Result<usize> {
        let (id, rx) = {
            let mut dispatch = self.inner.lock_dispatch();
            if dispatch.state != PoolState::Running {
                return Err(OfficeError::PoolNotRunning);
            }
            if dispatch.waiters.is_empty() {
                if let Some(index) = self.inner.claim_free() {
                    debug!(entry = index, task_id = %task.id, "Task dispatched");
                    return Ok(index);
                }
            }
            if self.inner.all_failed() {
                return Err(OfficeError::ProcessUnavailable(format!(
                    "all {} office processes are down",
                    self.inner.entries.len()
                )));
            }
            let id = self.inner.next_waiter_id.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            dispatch.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        let wait = self.queue_wait(task);
        debug!(task_id = %task.id, waiter = id, wait_ms = wait.as_millis() as u64, "Task queued");

        let mut ticket = QueueTicket {
            inner: Arc::clone(&self.inner),
            id,
            rx,
            redeemed: false,
        };
        match timeout(wait, &mut ticket.rx).await {
            Ok(Ok(index)) => {
                ticket.redeemed = true;
                Ok(index)
            }
            Ok(Err(_)) => Err(OfficeError::PoolNotRunning),
            Err(_) => {
                warn!(task_id = %task.id, wait_ms = wait.as_millis() as u64, "Task queue timeout");
                Err(OfficeError::QueueTimeout(wait))
            }
        }
    }

    /// Queue timeout, capped by the task deadline
    fn queue_wait(&self, task: &Task) -> Duration {
        let limit = self.inner.task_queue_timeout;
        match task.remaining_ms(self.inner.time_provider.now_millis()) {
            Some(ms) => limit.min(Duration::from_millis(ms as u64)),
            None => limit,
        }
    }

    fn abort_watchers(&self) {
        for watcher in self.inner.lock_watchers().drain(..) {
            watcher.abort();
        }
    }

    async fn remove_temp_dir(&self) {
        match tokio::fs::remove_dir_all(&self.inner.temp_dir).await {
            Ok(()) => debug!(path = %self.inner.temp_dir.display(), "Removed pool temp dir"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.inner.temp_dir.display(), error = %e, "Failed to remove pool temp dir")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionEndpoint, ExistingProcessAction};
    use crate::port::mocks::{FixedClock, MockBehavior, MockOffice, SequentialIds};
    use serde_json::json;
    use tokio::time::sleep;

    fn config(ports: &[u16], queue_timeout_ms: u64) -> Configuration {
        Configuration::builder()
            .port_numbers(ports.iter().copied())
            .task_execution_timeout(Duration::from_secs(1))
            .task_queue_timeout(Duration::from_millis(queue_timeout_ms))
            .process_timeout(Duration::from_millis(300))
            .process_retry_interval(Duration::from_millis(10))
            .existing_process_action(ExistingProcessAction::Kill)
            .start_fail_fast(true)
            .build()
            .unwrap()
    }

    fn pool(office: &MockOffice, config: &Configuration) -> OfficeManagerPool {
        let office = Arc::new(office.clone());
        OfficeManagerPool::new(
            config,
            OfficeAdapters::new(office.clone(), office.clone(), office),
        )
    }

    #[tokio::test]
    async fn test_execute_requires_running_pool() {
        let office = MockOffice::new();
        let pool = pool(&office, &config(&[2002], 1000));

        let err = pool.execute(Task::new_test(json!(1))).await.unwrap_err();
        assert!(matches!(err, OfficeError::PoolNotRunning));

        pool.start().await.unwrap();
        pool.stop().await;

        let err = pool.execute(Task::new_test(json!(1))).await.unwrap_err();
        assert!(matches!(err, OfficeError::PoolNotRunning));
    }

    #[tokio::test]
    async fn test_tasks_spread_over_entries() {
        let office = MockOffice::new();
        office.set_behavior(MockBehavior::Delay(Duration::from_millis(50)));
        let pool = pool(&office, &config(&[2002, 2003], 1000));
        pool.start().await.unwrap();

        let (a, b) = tokio::join!(
            pool.execute(Task::new_test(json!("a"))),
            pool.execute(Task::new_test(json!("b")))
        );

        assert_ne!(a.unwrap().as_value()["pid"], b.unwrap().as_value()["pid"]);
        assert!(!office.overlap_detected());
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_fifo_order() {
        let office = MockOffice::new();
        office.set_behavior(MockBehavior::Delay(Duration::from_millis(30)));
        let pool = pool(&office, &config(&[2002], 5000));
        pool.start().await.unwrap();

        let mut handles = Vec::new();
        let mut ids = Vec::new();
        for n in 0..5 {
            let task = Task::new_test(json!(n));
            ids.push(task.id.clone());
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.execute(task).await }));
            sleep(Duration::from_millis(5)).await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let served: Vec<String> = office.executions().into_iter().map(|r| r.task_id).collect();
        assert_eq!(served, ids);
        assert!(!office.overlap_detected());
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_queue_timeout() {
        let office = MockOffice::new();
        office.set_behavior(MockBehavior::Delay(Duration::from_millis(300)));
        let pool = pool(&office, &config(&[2002], 50));
        pool.start().await.unwrap();

        let busy = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.execute(Task::new_test(json!(1))).await })
        };
        sleep(Duration::from_millis(10)).await;

        let err = pool.execute(Task::new_test(json!(2))).await.unwrap_err();

        assert!(matches!(err, OfficeError::QueueTimeout(d) if d == Duration::from_millis(50)));
        assert_eq!(pool.queued_tasks(), 0);
        assert!(busy.await.unwrap().is_ok());
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_deadline_caps_queue_wait() {
        let office = MockOffice::new();
        office.set_behavior(MockBehavior::Delay(Duration::from_millis(300)));
        let pool = pool(&office, &config(&[2002], 5000));
        pool.start().await.unwrap();

        let busy = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.execute(Task::new_test(json!(1))).await })
        };
        sleep(Duration::from_millis(10)).await;

        let now = SystemTimeProvider.now_millis();
        let task = Task::new("deadline", now, TaskPayload::new(json!(2))).with_deadline(now + 40);
        let started = tokio::time::Instant::now();
        let err = pool.execute(task).await.unwrap_err();

        assert!(matches!(err, OfficeError::QueueTimeout(_)));
        assert!(started.elapsed() < Duration::from_millis(250));
        busy.await.unwrap().unwrap();
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let office = MockOffice::new();
        office.set_behavior(MockBehavior::Delay(Duration::from_millis(100)));
        let pool = pool(&office, &config(&[2002], 5000));
        pool.start().await.unwrap();

        let first = Task::new_test(json!("first"));
        let cancelled = Task::new_test(json!("cancelled"));
        let last = Task::new_test(json!("last"));
        let (first_id, cancelled_id, last_id) =
            (first.id.clone(), cancelled.id.clone(), last.id.clone());

        let p = pool.clone();
        let h1 = tokio::spawn(async move { p.execute(first).await });
        sleep(Duration::from_millis(10)).await;
        let p = pool.clone();
        let h2 = tokio::spawn(async move { p.execute(cancelled).await });
        sleep(Duration::from_millis(10)).await;
        let p = pool.clone();
        let h3 = tokio::spawn(async move { p.execute(last).await });
        sleep(Duration::from_millis(10)).await;

        assert_eq!(pool.queued_tasks(), 2);
        h2.abort();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.queued_tasks(), 1);

        h1.await.unwrap().unwrap();
        h3.await.unwrap().unwrap();

        let served: Vec<String> = office.executions().into_iter().map(|r| r.task_id).collect();
        assert_eq!(served, vec![first_id, last_id]);
        assert!(!served.contains(&cancelled_id));
        assert_eq!(pool.entries()[0].supervisor.restarts, 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_fails_queued_tasks() {
        let office = MockOffice::new();
        office.set_behavior(MockBehavior::Delay(Duration::from_millis(100)));
        let pool = pool(&office, &config(&[2002], 5000));
        pool.start().await.unwrap();

        let p = pool.clone();
        let running = tokio::spawn(async move { p.execute(Task::new_test(json!(1))).await });
        sleep(Duration::from_millis(10)).await;
        let p = pool.clone();
        let queued = tokio::spawn(async move { p.execute(Task::new_test(json!(2))).await });
        sleep(Duration::from_millis(10)).await;

        pool.stop().await;

        assert!(matches!(
            queued.await.unwrap(),
            Err(OfficeError::PoolNotRunning)
        ));
        assert!(running.await.unwrap().is_ok());
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let office = MockOffice::new();
        let pool = pool(&office, &config(&[2002], 1000));

        pool.start().await.unwrap();
        let err = pool.start().await.unwrap_err();
        assert!(matches!(err, OfficeError::InvalidState(_)));

        pool.stop().await;
        pool.stop().await;
        assert!(matches!(pool.start().await, Err(OfficeError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_fail_fast_start_stops_started_entries() {
        let office = MockOffice::new();
        office.spawn_stale(&ConnectionEndpoint::socket("127.0.0.1", 2003));
        let cfg = Configuration::builder()
            .port_numbers([2002, 2003])
            .process_timeout(Duration::from_millis(300))
            .process_retry_interval(Duration::from_millis(10))
            .existing_process_action(ExistingProcessAction::Fail)
            .start_fail_fast(true)
            .build()
            .unwrap();
        let pool = pool(&office, &cfg);

        let err = pool.start().await.unwrap_err();

        assert!(matches!(err, OfficeError::ProcessStart(_)));
        let launched = office.launched_pids();
        assert_eq!(launched.len(), 1);
        assert!(!office.is_alive(launched[0]));
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_all_entries_failed_is_unavailable() {
        let office = MockOffice::new();
        office.spawn_stale(&ConnectionEndpoint::socket("127.0.0.1", 2002));
        let cfg = Configuration::builder()
            .port_numbers([2002])
            .process_timeout(Duration::from_millis(300))
            .existing_process_action(ExistingProcessAction::Fail)
            .health_check_interval(Duration::from_secs(60))
            .start_fail_fast(false)
            .task_queue_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let pool = pool(&office, &cfg);
        pool.start().await.unwrap();
        let mut states = pool.inner.entries[0].supervisor().subscribe();
        timeout(
            Duration::from_secs(2),
            states.wait_for(|s| *s == ProcessState::Failed),
        )
        .await
        .unwrap()
        .unwrap();

        let started = tokio::time::Instant::now();
        let err = pool.execute(Task::new_test(json!(1))).await.unwrap_err();

        assert!(matches!(err, OfficeError::ProcessUnavailable(_)));
        assert!(started.elapsed() < Duration::from_secs(1), "no queue wait");
        assert_eq!(pool.queued_tasks(), 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_release_of_down_entry_keeps_waiters_queued() {
        let office = MockOffice::new();
        let pool = pool(&office, &config(&[2002], 5000));
        pool.start().await.unwrap();
        let entry = &pool.inner.entries[0];

        assert!(entry.try_claim());
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.execute(Task::new_test(json!("queued"))).await })
        };
        while pool.queued_tasks() == 0 {
            sleep(Duration::from_millis(5)).await;
        }

        // Process goes down while the slot is held: no handover
        office.refuse_all_connects(true);
        assert!(entry.supervisor().restart("test").await.is_err());
        pool.inner.release(0);
        assert_eq!(pool.queued_tasks(), 1);
        assert!(!waiter.is_finished());

        // Running again: the release hands the entry to the waiter
        office.refuse_all_connects(false);
        assert!(entry.try_claim());
        entry.supervisor().restart("recover").await.unwrap();
        pool.inner.release(0);

        let output = waiter.await.unwrap().unwrap();
        assert_eq!(output.as_value()["payload"], json!("queued"));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_removes_temp_dir() {
        let working = tempfile::tempdir().unwrap();
        let office = MockOffice::new();
        let cfg = Configuration::builder()
            .working_dir(working.path())
            .process_timeout(Duration::from_millis(300))
            .process_retry_interval(Duration::from_millis(10))
            .start_fail_fast(true)
            .build()
            .unwrap();
        let pool = pool(&office, &cfg);
        assert!(pool.temp_dir().starts_with(working.path()));

        pool.start().await.unwrap();
        tokio::fs::create_dir_all(pool.temp_dir()).await.unwrap();
        pool.stop().await;

        assert!(!pool.temp_dir().exists());
    }

    #[tokio::test]
    async fn test_submit_assigns_fresh_ids() {
        let office = MockOffice::new();
        let pool = pool(&office, &config(&[2002], 1000));
        pool.start().await.unwrap();

        pool.submit(TaskPayload::new(json!(1))).await.unwrap();
        pool.submit(TaskPayload::new(json!(2))).await.unwrap();

        let executions = office.executions();
        assert_eq!(executions.len(), 2);
        assert_ne!(executions[0].task_id, executions[1].task_id);
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_injected_providers_drive_ids_and_deadlines() {
        let office = MockOffice::new();
        office.set_behavior(MockBehavior::Delay(Duration::from_millis(200)));
        let clock = Arc::new(FixedClock::at(1_000_000));
        let office_arc = Arc::new(office.clone());
        let pool = OfficeManagerPool::with_providers(
            &config(&[2002], 5000),
            OfficeAdapters::new(office_arc.clone(), office_arc.clone(), office_arc),
            Arc::new(SequentialIds::new("conv")),
            clock.clone(),
        );
        pool.start().await.unwrap();

        let busy = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(TaskPayload::new(json!("busy"))).await })
        };
        sleep(Duration::from_millis(10)).await;

        // Deadline 30ms ahead of the injected clock, however late the wall clock is
        clock.advance(5);
        let task = Task::new("late", 0, TaskPayload::new(json!(2))).with_deadline(1_000_035);
        let err = pool.execute(task).await.unwrap_err();
        assert!(matches!(err, OfficeError::QueueTimeout(d) if d == Duration::from_millis(30)));

        busy.await.unwrap().unwrap();
        pool.submit(TaskPayload::new(json!("next"))).await.unwrap();

        let ids: Vec<String> = office.executions().into_iter().map(|e| e.task_id).collect();
        assert_eq!(ids, vec!["conv-1".to_string(), "conv-2".to_string()]);
        pool.stop().await;
    }
}
