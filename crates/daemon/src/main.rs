//! Officepool - Main Entry Point
//! Hosts a pool of headless office processes until Ctrl+C

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use officepool_core::application::OfficeService;
use officepool_core::domain::{ConfigurationBuilder, ExistingProcessAction};
use officepool_infra_system::system_adapters;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "officepool=info";
const LOG_FILE_PREFIX: &str = "officepool.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Development: pretty formatting with colors
    Pretty,
    /// Production: JSON structured logging
    Json,
}

/// Office process pool daemon
///
/// Every option falls back to an `OFFICEPOOL_*` environment variable; unset
/// options keep the pool defaults. Durations are in milliseconds.
#[derive(Debug, Parser)]
#[command(name = "officepool", version, about)]
struct Args {
    #[arg(long, env = "OFFICEPOOL_OFFICE_HOME")]
    office_home: Option<PathBuf>,

    #[arg(long, env = "OFFICEPOOL_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    #[arg(long, env = "OFFICEPOOL_TEMPLATE_PROFILE_DIR")]
    template_profile_dir: Option<PathBuf>,

    /// Command prefix, e.g. "sudo -u office"
    #[arg(long, env = "OFFICEPOOL_RUN_AS_ARGS", value_delimiter = ' ')]
    run_as_args: Vec<String>,

    #[arg(long, env = "OFFICEPOOL_HOST_NAME")]
    host_name: Option<String>,

    /// Comma separated, e.g. "2002,2003"
    #[arg(long, env = "OFFICEPOOL_PORT_NUMBERS")]
    port_numbers: Option<String>,

    /// Comma separated pipe names; replaces the socket endpoints
    #[arg(long, env = "OFFICEPOOL_PIPE_NAMES", value_delimiter = ',')]
    pipe_names: Vec<String>,

    #[arg(long, env = "OFFICEPOOL_TASK_EXECUTION_TIMEOUT")]
    task_execution_timeout: Option<u64>,

    #[arg(long, env = "OFFICEPOOL_TASK_QUEUE_TIMEOUT")]
    task_queue_timeout: Option<u64>,

    #[arg(long, env = "OFFICEPOOL_PROCESS_TIMEOUT")]
    process_timeout: Option<u64>,

    #[arg(long, env = "OFFICEPOOL_PROCESS_RETRY_INTERVAL")]
    process_retry_interval: Option<u64>,

    #[arg(long, env = "OFFICEPOOL_AFTER_START_PROCESS_DELAY")]
    after_start_process_delay: Option<u64>,

    #[arg(long, env = "OFFICEPOOL_HEALTH_CHECK_INTERVAL")]
    health_check_interval: Option<u64>,

    /// connect | kill | fail | connect-or-kill
    #[arg(long, env = "OFFICEPOOL_EXISTING_PROCESS_ACTION")]
    existing_process_action: Option<ExistingProcessAction>,

    #[arg(long, env = "OFFICEPOOL_START_FAIL_FAST")]
    start_fail_fast: Option<bool>,

    #[arg(long, env = "OFFICEPOOL_KEEP_ALIVE_ON_SHUTDOWN")]
    keep_alive_on_shutdown: Option<bool>,

    /// 0 disables recycling
    #[arg(long, env = "OFFICEPOOL_MAX_TASKS_PER_PROCESS")]
    max_tasks_per_process: Option<u32>,

    #[arg(long, env = "OFFICEPOOL_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, env = "OFFICEPOOL_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Args {
    /// Map the given options onto a builder; validation happens in `build`
    fn builder(&self) -> ConfigurationBuilder {
        let ms = Duration::from_millis;
        let mut builder = ConfigurationBuilder::new();

        if let Some(dir) = &self.office_home {
            builder = builder.office_home(dir);
        }
        if let Some(dir) = &self.working_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(dir) = &self.template_profile_dir {
            builder = builder.template_profile_dir(dir);
        }
        let run_as: Vec<&String> = self.run_as_args.iter().filter(|a| !a.is_empty()).collect();
        if !run_as.is_empty() {
            builder = builder.run_as_args(run_as.into_iter().cloned());
        }
        if let Some(host) = &self.host_name {
            builder = builder.host_name(host);
        }
        if let Some(ports) = &self.port_numbers {
            builder = builder.port_numbers_str(ports);
        }
        if !self.pipe_names.is_empty() {
            builder = builder.pipe_names(self.pipe_names.iter().cloned());
        }
        if let Some(v) = self.task_execution_timeout {
            builder = builder.task_execution_timeout(ms(v));
        }
        if let Some(v) = self.task_queue_timeout {
            builder = builder.task_queue_timeout(ms(v));
        }
        if let Some(v) = self.process_timeout {
            builder = builder.process_timeout(ms(v));
        }
        if let Some(v) = self.process_retry_interval {
            builder = builder.process_retry_interval(ms(v));
        }
        if let Some(v) = self.after_start_process_delay {
            builder = builder.after_start_process_delay(ms(v));
        }
        if let Some(v) = self.health_check_interval {
            builder = builder.health_check_interval(ms(v));
        }
        if let Some(action) = self.existing_process_action {
            builder = builder.existing_process_action(action);
        }
        if let Some(v) = self.start_fail_fast {
            builder = builder.start_fail_fast(v);
        }
        if let Some(v) = self.keep_alive_on_shutdown {
            builder = builder.keep_alive_on_shutdown(v);
        }
        if let Some(v) = self.max_tasks_per_process {
            builder = builder.max_tasks_per_process(v);
        }
        builder
    }
}

/// Install the global subscriber; the returned guard flushes the file writer
fn init_logging(format: LogFormat, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("invalid log filter")?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(file_layer).with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    }
    .context("failed to install tracing subscriber")?;

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Logging
    let _log_guard = init_logging(args.log_format, args.log_dir.as_deref())?;
    info!("Officepool v{} starting...", VERSION);

    // 2. Wire adapters and start the pool
    let service = OfficeService::new(args.builder(), system_adapters());
    service
        .initialize()
        .await
        .context("office pool failed to start")?;

    if let Some(pool) = service.pool().await {
        for entry in pool.entries() {
            info!(
                entry = entry.index,
                endpoint = %entry.supervisor.connect_string,
                state = %entry.supervisor.state,
                "Entry ready"
            );
        }
    }

    info!("System ready. Press Ctrl+C to shutdown");

    // 3. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 4. Graceful shutdown
    service.shutdown().await;
    info!("Shutdown complete.");

    Ok(())
}
