// Pool Configuration Domain Model
//
// Built once by `ConfigurationBuilder::build`, immutable afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::endpoint::ConnectionEndpoint;
use crate::domain::error::{DomainError, Result};

/// What to do when a process from a previous run already holds an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExistingProcessAction {
    /// Reuse the running process, skip the launch
    Connect,
    /// Terminate it, then launch a fresh process
    Kill,
    /// Abort the start
    Fail,
    /// Try to reuse it; terminate and relaunch when the connection fails
    ConnectOrKill,
}

impl std::fmt::Display for ExistingProcessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExistingProcessAction::Connect => write!(f, "CONNECT"),
            ExistingProcessAction::Kill => write!(f, "KILL"),
            ExistingProcessAction::Fail => write!(f, "FAIL"),
            ExistingProcessAction::ConnectOrKill => write!(f, "CONNECT_OR_KILL"),
        }
    }
}

impl std::str::FromStr for ExistingProcessAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "connect" => Ok(ExistingProcessAction::Connect),
            "kill" => Ok(ExistingProcessAction::Kill),
            "fail" => Ok(ExistingProcessAction::Fail),
            "connect_or_kill" => Ok(ExistingProcessAction::ConnectOrKill),
            other => Err(DomainError::ValidationError(format!(
                "Unknown existing process action: {}",
                other
            ))),
        }
    }
}

/// Built-in defaults (ADR: No magic values)
pub mod defaults {
    use super::ExistingProcessAction;
    use std::path::PathBuf;
    use std::time::Duration;

    pub const HOST_NAME: &str = "127.0.0.1";
    pub const PORT_NUMBER: u16 = 2002;

    /// Per-task execution cap (2 minutes)
    pub const TASK_EXECUTION_TIMEOUT: Duration = Duration::from_millis(120_000);

    /// Pool-wide queue wait cap (30 seconds)
    pub const TASK_QUEUE_TIMEOUT: Duration = Duration::from_millis(30_000);

    /// Start-and-connect deadline (2 minutes)
    pub const PROCESS_TIMEOUT: Duration = Duration::from_millis(120_000);

    /// Spacing between connection attempts
    pub const PROCESS_RETRY_INTERVAL: Duration = Duration::from_millis(250);

    pub const AFTER_START_PROCESS_DELAY: Duration = Duration::from_millis(0);
    pub const EXISTING_PROCESS_ACTION: ExistingProcessAction = ExistingProcessAction::Kill;
    pub const START_FAIL_FAST: bool = false;
    pub const KEEP_ALIVE_ON_SHUTDOWN: bool = false;

    /// Tasks before a process is recycled (0 disables recycling)
    pub const MAX_TASKS_PER_PROCESS: u32 = 200;

    /// Spacing of background health checks and restart attempts
    pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(10_000);

    /// Environment variable overriding office home detection
    pub const OFFICE_HOME_ENV: &str = "OFFICE_HOME";

    pub fn working_dir() -> PathBuf {
        std::env::temp_dir()
    }

    /// Platform install locations, most likely first
    pub fn office_home_candidates() -> Vec<PathBuf> {
        let candidates: &[&str] = if cfg!(target_os = "macos") {
            &[
                "/Applications/LibreOffice.app/Contents",
                "/Applications/OpenOffice.app/Contents",
            ]
        } else if cfg!(windows) {
            &[
                r"C:\Program Files\LibreOffice",
                r"C:\Program Files (x86)\LibreOffice",
                r"C:\Program Files\OpenOffice 4",
            ]
        } else {
            &[
                "/usr/lib/libreoffice",
                "/usr/lib64/libreoffice",
                "/usr/local/lib/libreoffice",
                "/opt/libreoffice",
                "/usr/lib/openoffice",
            ]
        };
        candidates.iter().map(PathBuf::from).collect()
    }

    /// Detect the office install directory
    ///
    /// `OFFICE_HOME` wins; otherwise the first candidate that has a `program`
    /// directory; otherwise the first candidate for the platform.
    pub fn office_home() -> PathBuf {
        if let Some(home) = std::env::var_os(OFFICE_HOME_ENV) {
            return PathBuf::from(home);
        }
        let candidates = office_home_candidates();
        candidates
            .iter()
            .find(|p| p.join("program").is_dir())
            .or_else(|| candidates.first())
            .cloned()
            .unwrap_or_default()
    }
}

/// Immutable, validated pool configuration
#[derive(Debug, Clone)]
pub struct Configuration {
    working_dir: PathBuf,
    temp_dir: PathBuf,
    office_home: PathBuf,
    template_profile_dir: Option<PathBuf>,
    run_as_args: Vec<String>,
    host_name: String,
    port_numbers: Vec<u16>,
    pipe_names: Vec<String>,
    process_timeout: Duration,
    process_retry_interval: Duration,
    after_start_process_delay: Duration,
    existing_process_action: ExistingProcessAction,
    start_fail_fast: bool,
    keep_alive_on_shutdown: bool,
    task_execution_timeout: Duration,
    task_queue_timeout: Duration,
    max_tasks_per_process: u32,
    health_check_interval: Duration,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::new()
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Private temp root of one pool, a direct child of `working_dir`
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn office_home(&self) -> &Path {
        &self.office_home
    }

    pub fn template_profile_dir(&self) -> Option<&Path> {
        self.template_profile_dir.as_deref()
    }

    /// Explicit template profile dir if configured, else `default`
    pub fn template_profile_dir_or_default(&self, default: &Path) -> PathBuf {
        self.template_profile_dir
            .clone()
            .unwrap_or_else(|| default.to_path_buf())
    }

    pub fn run_as_args(&self) -> &[String] {
        &self.run_as_args
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn port_numbers(&self) -> &[u16] {
        &self.port_numbers
    }

    pub fn pipe_names(&self) -> &[String] {
        &self.pipe_names
    }

    pub fn process_timeout(&self) -> Duration {
        self.process_timeout
    }

    pub fn process_retry_interval(&self) -> Duration {
        self.process_retry_interval
    }

    pub fn after_start_process_delay(&self) -> Duration {
        self.after_start_process_delay
    }

    pub fn existing_process_action(&self) -> ExistingProcessAction {
        self.existing_process_action
    }

    pub fn start_fail_fast(&self) -> bool {
        self.start_fail_fast
    }

    pub fn keep_alive_on_shutdown(&self) -> bool {
        self.keep_alive_on_shutdown
    }

    pub fn task_execution_timeout(&self) -> Duration {
        self.task_execution_timeout
    }

    pub fn task_queue_timeout(&self) -> Duration {
        self.task_queue_timeout
    }

    pub fn max_tasks_per_process(&self) -> u32 {
        self.max_tasks_per_process
    }

    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    /// One endpoint per pool entry; pipes take precedence over ports
    pub fn endpoints(&self) -> Vec<ConnectionEndpoint> {
        if !self.pipe_names.is_empty() {
            return self
                .pipe_names
                .iter()
                .map(|name| ConnectionEndpoint::pipe(name.clone()))
                .collect();
        }
        self.port_numbers
            .iter()
            .map(|port| ConnectionEndpoint::socket(self.host_name.clone(), *port))
            .collect()
    }
}

/// Collects raw settings and normalizes them in a single `build` step
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    working_dir: Option<PathBuf>,
    office_home: Option<PathBuf>,
    template_profile_dir: Option<PathBuf>,
    run_as_args: Vec<String>,
    host_name: Option<String>,
    port_numbers: Vec<u16>,
    pipe_names: Vec<String>,
    process_timeout: Option<Duration>,
    process_retry_interval: Option<Duration>,
    after_start_process_delay: Option<Duration>,
    existing_process_action: Option<ExistingProcessAction>,
    start_fail_fast: Option<bool>,
    keep_alive_on_shutdown: Option<bool>,
    task_execution_timeout: Option<Duration>,
    task_queue_timeout: Option<Duration>,
    max_tasks_per_process: Option<u32>,
    health_check_interval: Option<Duration>,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn office_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.office_home = Some(home.into());
        self
    }

    pub fn template_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_profile_dir = Some(dir.into());
        self
    }

    /// Fallback template dir: used only when none is set explicitly and `dir`
    /// is a valid profile directory
    pub fn template_profile_dir_or_default(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if self.template_profile_dir.is_some() {
            return self;
        }
        if is_valid_template_profile_dir(&dir) {
            self.template_profile_dir = Some(dir);
        } else {
            debug!(dir = %dir.display(), "Ignoring invalid template profile dir");
        }
        self
    }

    pub fn run_as_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_as_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn host_name(mut self, host: impl Into<String>) -> Self {
        self.host_name = Some(host.into());
        self
    }

    pub fn port_numbers<I>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.port_numbers = ports.into_iter().collect();
        self
    }

    /// Parse a comma separated port list permissively
    ///
    /// Tokens that are not valid non-zero ports are dropped with a warning; an
    /// empty result falls back to the default port at `build` time.
    pub fn port_numbers_str(mut self, raw: &str) -> Self {
        self.port_numbers = parse_port_list(raw);
        self
    }

    pub fn pipe_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipe_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = Some(timeout);
        self
    }

    pub fn process_retry_interval(mut self, interval: Duration) -> Self {
        self.process_retry_interval = Some(interval);
        self
    }

    pub fn after_start_process_delay(mut self, delay: Duration) -> Self {
        self.after_start_process_delay = Some(delay);
        self
    }

    pub fn existing_process_action(mut self, action: ExistingProcessAction) -> Self {
        self.existing_process_action = Some(action);
        self
    }

    pub fn start_fail_fast(mut self, fail_fast: bool) -> Self {
        self.start_fail_fast = Some(fail_fast);
        self
    }

    pub fn keep_alive_on_shutdown(mut self, keep_alive: bool) -> Self {
        self.keep_alive_on_shutdown = Some(keep_alive);
        self
    }

    pub fn task_execution_timeout(mut self, timeout: Duration) -> Self {
        self.task_execution_timeout = Some(timeout);
        self
    }

    pub fn task_queue_timeout(mut self, timeout: Duration) -> Self {
        self.task_queue_timeout = Some(timeout);
        self
    }

    pub fn max_tasks_per_process(mut self, max: u32) -> Self {
        self.max_tasks_per_process = Some(max);
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    /// Validate and default every field
    ///
    /// # Errors
    /// - `DomainError::Configuration` for an empty host name, a working dir that
    ///   is not a directory, or an invalid explicit template profile dir
    pub fn build(self) -> Result<Configuration> {
        let host_name = self
            .host_name
            .unwrap_or_else(|| defaults::HOST_NAME.to_string());
        if host_name.trim().is_empty() {
            return Err(DomainError::Configuration(
                "host name must not be empty".to_string(),
            ));
        }

        let working_dir = self.working_dir.unwrap_or_else(defaults::working_dir);
        if working_dir.exists() && !working_dir.is_dir() {
            return Err(DomainError::Configuration(format!(
                "working dir is not a directory: {}",
                working_dir.display()
            )));
        }

        if let Some(dir) = &self.template_profile_dir {
            if !is_valid_template_profile_dir(dir) {
                return Err(DomainError::Configuration(format!(
                    "template profile dir must be a directory containing 'user': {}",
                    dir.display()
                )));
            }
        }

        let mut port_numbers = dedup_preserving_order(self.port_numbers);
        if port_numbers.is_empty() {
            port_numbers.push(defaults::PORT_NUMBER);
        }

        let pipe_names = dedup_preserving_order(
            self.pipe_names
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        );

        let temp_dir = working_dir.join(format!("officepool_{}", uuid::Uuid::new_v4()));

        Ok(Configuration {
            working_dir,
            temp_dir,
            office_home: self.office_home.unwrap_or_else(defaults::office_home),
            template_profile_dir: self.template_profile_dir,
            run_as_args: self.run_as_args,
            host_name,
            port_numbers,
            pipe_names,
            process_timeout: self.process_timeout.unwrap_or(defaults::PROCESS_TIMEOUT),
            process_retry_interval: self
                .process_retry_interval
                .unwrap_or(defaults::PROCESS_RETRY_INTERVAL),
            after_start_process_delay: self
                .after_start_process_delay
                .unwrap_or(defaults::AFTER_START_PROCESS_DELAY),
            existing_process_action: self
                .existing_process_action
                .unwrap_or(defaults::EXISTING_PROCESS_ACTION),
            start_fail_fast: self.start_fail_fast.unwrap_or(defaults::START_FAIL_FAST),
            keep_alive_on_shutdown: self
                .keep_alive_on_shutdown
                .unwrap_or(defaults::KEEP_ALIVE_ON_SHUTDOWN),
            task_execution_timeout: self
                .task_execution_timeout
                .unwrap_or(defaults::TASK_EXECUTION_TIMEOUT),
            task_queue_timeout: self
                .task_queue_timeout
                .unwrap_or(defaults::TASK_QUEUE_TIMEOUT),
            max_tasks_per_process: self
                .max_tasks_per_process
                .unwrap_or(defaults::MAX_TASKS_PER_PROCESS),
            health_check_interval: self
                .health_check_interval
                .unwrap_or(defaults::HEALTH_CHECK_INTERVAL),
        })
    }
}

/// A template profile dir is a directory holding a `user` sub-directory
pub fn is_valid_template_profile_dir(dir: &Path) -> bool {
    dir.is_dir() && dir.join("user").is_dir()
}

fn parse_port_list(raw: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<u16>() {
            Ok(port) if port > 0 => ports.push(port),
            _ => warn!(token = %token, "Dropping invalid port number"),
        }
    }
    if ports.is_empty() {
        warn!(
            raw = %raw,
            default_port = defaults::PORT_NUMBER,
            "No valid port numbers, falling back to default"
        );
    }
    ports
}

fn dedup_preserving_order<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut unique: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}
