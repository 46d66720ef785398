// ============================================================================
// Mock Implementations for Testing
// ============================================================================
//
// `MockOffice` is one in-memory "office world": it plays the process table
// (ProcessMonitor), the launcher (OfficeLauncher) and the bridge
// (OfficeConnector) at once, so a terminate sent over a connection is visible
// to the process handle that launched it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::domain::{ConnectionEndpoint, Task, TaskOutput};
use crate::port::id_provider::IdProvider;
use crate::port::office_connector::{ConnectionError, OfficeConnection, OfficeConnector};
use crate::port::office_launcher::{LaunchSpec, OfficeLauncher, OfficeProcess, ProcessExit};
use crate::port::process_monitor::{ProcessError, ProcessMonitor, ProcessQuery};
use crate::port::time_provider::TimeProvider;

/// What a connection does with a task
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return the payload together with the serving pid
    Echo,
    /// Echo after a delay (for timeout testing)
    Delay(Duration),
    /// Fail the conversion, process stays healthy
    Fail(String),
    /// Drop the bridge and kill the process
    Crash,
}

/// One task as observed by the fake process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub task_id: String,
    pub pid: u32,
}

#[derive(Debug, Clone)]
struct MockProcess {
    pid: u32,
    connect_string: String,
    accept_argument: String,
    alive: bool,
    exit: Option<ProcessExit>,
    launched: bool,
}

#[derive(Debug)]
struct World {
    processes: Vec<MockProcess>,
    next_pid: u32,
    launches: Vec<LaunchSpec>,
    kills: Vec<u32>,
    connects: usize,
    terminations: usize,
    fail_next_launches: usize,
    refuse_next_connects: usize,
    refuse_all_connects: bool,
    exit_code_on_launch: Option<i32>,
    ignore_terminate: bool,
    behavior: MockBehavior,
    executions: Vec<ExecutionRecord>,
    in_flight: HashMap<u32, usize>,
    overlap_detected: bool,
}

impl World {
    fn live_process_for(&self, connect_string: &str) -> Option<u32> {
        self.processes
            .iter()
            .find(|p| p.alive && p.connect_string == connect_string)
            .map(|p| p.pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.processes.iter().any(|p| p.pid == pid && p.alive)
    }

    fn mark_exited(&mut self, pid: u32, code: Option<i32>) {
        if let Some(p) = self.processes.iter_mut().find(|p| p.pid == pid) {
            if p.alive {
                p.alive = false;
                p.exit = Some(ProcessExit { code });
            }
        }
    }
}

/// Lock the world, ignoring poison
fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    match world.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory office world
#[derive(Clone)]
pub struct MockOffice {
    world: Arc<Mutex<World>>,
}

impl Default for MockOffice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOffice {
    pub fn new() -> Self {
        Self {
            world: Arc::new(Mutex::new(World {
                processes: Vec::new(),
                next_pid: 1000,
                launches: Vec::new(),
                kills: Vec::new(),
                connects: 0,
                terminations: 0,
                fail_next_launches: 0,
                refuse_next_connects: 0,
                refuse_all_connects: false,
                exit_code_on_launch: None,
                ignore_terminate: false,
                behavior: MockBehavior::Echo,
                executions: Vec::new(),
                in_flight: HashMap::new(),
                overlap_detected: false,
            })),
        }
    }

    fn world(&self) -> MutexGuard<'_, World> {
        lock(&self.world)
    }

    /// Register a process from a "previous run" holding `endpoint`
    pub fn spawn_stale(&self, endpoint: &ConnectionEndpoint) -> u32 {
        let mut world = self.world();
        let pid = world.next_pid;
        world.next_pid += 1;
        world.processes.push(MockProcess {
            pid,
            connect_string: endpoint.connect_string(),
            accept_argument: endpoint.accept_argument(),
            alive: true,
            exit: None,
            launched: false,
        });
        pid
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        self.world().behavior = behavior;
    }

    pub fn fail_next_launches(&self, count: usize) {
        self.world().fail_next_launches = count;
    }

    pub fn refuse_next_connects(&self, count: usize) {
        self.world().refuse_next_connects = count;
    }

    pub fn refuse_all_connects(&self, refuse: bool) {
        self.world().refuse_all_connects = refuse;
    }

    /// Next launched process exits immediately with `code`
    pub fn exit_on_next_launch(&self, code: i32) {
        self.world().exit_code_on_launch = Some(code);
    }

    /// Processes keep running after a terminate request
    pub fn ignore_terminate(&self, ignore: bool) {
        self.world().ignore_terminate = ignore;
    }

    /// Kill a process behind the pool's back
    pub fn crash(&self, pid: u32) {
        self.world().mark_exited(pid, None);
    }

    pub fn launch_count(&self) -> usize {
        self.world().launches.len()
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.world().launches.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.world().connects
    }

    pub fn kills(&self) -> Vec<u32> {
        self.world().kills.clone()
    }

    pub fn terminations(&self) -> usize {
        self.world().terminations
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.world().executions.clone()
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.world().is_alive(pid)
    }

    pub fn live_pids(&self) -> Vec<u32> {
        self.world()
            .processes
            .iter()
            .filter(|p| p.alive)
            .map(|p| p.pid)
            .collect()
    }

    /// Pids of processes started through the launcher
    pub fn launched_pids(&self) -> Vec<u32> {
        self.world()
            .processes
            .iter()
            .filter(|p| p.launched)
            .map(|p| p.pid)
            .collect()
    }

    /// True if two tasks ever ran through the same process at once
    pub fn overlap_detected(&self) -> bool {
        self.world().overlap_detected
    }
}

#[async_trait]
impl ProcessMonitor for MockOffice {
    async fn find_pid(&self, query: &ProcessQuery) -> Result<Option<u32>, ProcessError> {
        Ok(self
            .world()
            .processes
            .iter()
            .find(|p| p.alive && p.accept_argument.contains(&query.argument))
            .map(|p| p.pid))
    }

    async fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        let mut world = self.world();
        world.kills.push(pid);
        world.mark_exited(pid, None);
        Ok(())
    }
}

/// Handle returned by `MockOffice::launch`
pub struct MockProcessHandle {
    world: Arc<Mutex<World>>,
    pid: u32,
}

impl MockProcessHandle {
    fn exit(&self) -> Option<ProcessExit> {
        let world = lock(&self.world);
        world
            .processes
            .iter()
            .find(|p| p.pid == self.pid)
            .and_then(|p| p.exit)
    }
}

#[async_trait]
impl OfficeProcess for MockProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&mut self) -> Result<Option<ProcessExit>, ProcessError> {
        Ok(self.exit())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Option<ProcessExit> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(exit) = self.exit() {
                return Some(exit);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        let mut world = lock(&self.world);
        world.kills.push(self.pid);
        world.mark_exited(self.pid, None);
        Ok(())
    }
}

#[async_trait]
impl OfficeLauncher for MockOffice {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn OfficeProcess>, ProcessError> {
        let mut world = self.world();
        world.launches.push(spec.clone());

        if world.fail_next_launches > 0 {
            world.fail_next_launches -= 1;
            return Err(ProcessError::LaunchFailed(
                "mock launch failure".to_string(),
            ));
        }

        let pid = world.next_pid;
        world.next_pid += 1;
        let exit = world
            .exit_code_on_launch
            .take()
            .map(|code| ProcessExit { code: Some(code) });
        world.processes.push(MockProcess {
            pid,
            connect_string: spec.endpoint.connect_string(),
            accept_argument: spec.endpoint.accept_argument(),
            alive: exit.is_none(),
            exit,
            launched: true,
        });

        Ok(Box::new(MockProcessHandle {
            world: Arc::clone(&self.world),
            pid,
        }))
    }
}

#[async_trait]
impl OfficeConnector for MockOffice {
    async fn connect(
        &self,
        endpoint: &ConnectionEndpoint,
    ) -> Result<Arc<dyn OfficeConnection>, ConnectionError> {
        let mut world = self.world();
        world.connects += 1;

        if world.refuse_all_connects {
            return Err(ConnectionError::Refused("mock refuses".to_string()));
        }
        if world.refuse_next_connects > 0 {
            world.refuse_next_connects -= 1;
            return Err(ConnectionError::Refused("mock not ready".to_string()));
        }

        let pid = world
            .live_process_for(&endpoint.connect_string())
            .ok_or_else(|| ConnectionError::Refused(format!("nothing listening on {}", endpoint)))?;

        Ok(Arc::new(MockConnection {
            world: Arc::clone(&self.world),
            pid,
        }))
    }
}

/// Bridge connection to one fake process
pub struct MockConnection {
    world: Arc<Mutex<World>>,
    pid: u32,
}

/// Decrements the in-flight counter even when the task future is dropped
struct InFlightGuard {
    world: Arc<Mutex<World>>,
    pid: u32,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut world) = self.world.lock() {
            if let Some(count) = world.in_flight.get_mut(&self.pid) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

#[async_trait]
impl OfficeConnection for MockConnection {
    async fn execute(&self, task: &Task) -> Result<TaskOutput, ConnectionError> {
        let behavior = {
            let mut world = lock(&self.world);
            if !world.is_alive(self.pid) {
                return Err(ConnectionError::Disconnected(format!(
                    "process {} is gone",
                    self.pid
                )));
            }
            let count = world.in_flight.entry(self.pid).or_insert(0);
            *count += 1;
            if *count > 1 {
                world.overlap_detected = true;
            }
            world.executions.push(ExecutionRecord {
                task_id: task.id.clone(),
                pid: self.pid,
            });
            world.behavior.clone()
        };
        let _guard = InFlightGuard {
            world: Arc::clone(&self.world),
            pid: self.pid,
        };

        let echo = || {
            TaskOutput::new(serde_json::json!({
                "task_id": task.id,
                "pid": self.pid,
                "payload": task.payload.as_value(),
            }))
        };

        match behavior {
            MockBehavior::Echo => Ok(echo()),
            MockBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(echo())
            }
            MockBehavior::Fail(msg) => Err(ConnectionError::TaskFailed(msg)),
            MockBehavior::Crash => {
                lock(&self.world).mark_exited(self.pid, None);
                Err(ConnectionError::Disconnected("mock crash".to_string()))
            }
        }
    }

    async fn is_alive(&self) -> bool {
        lock(&self.world).is_alive(self.pid)
    }

    async fn terminate(&self) -> Result<(), ConnectionError> {
        let mut world = lock(&self.world);
        world.terminations += 1;
        if !world.ignore_terminate {
            world.mark_exited(self.pid, Some(0));
        }
        Ok(())
    }

    async fn close(&self) {}
}

/// Ids `<prefix>-1`, `<prefix>-2`, ...
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdProvider for SequentialIds {
    fn generate_id(&self) -> String {
        format!("{}-{}", self.prefix, self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Clock that only moves when told to
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn at(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeProvider for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
