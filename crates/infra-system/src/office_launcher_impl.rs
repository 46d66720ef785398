// Office launcher implementation
// reason: tokio::process for async child management
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use officepool_core::port::office_launcher::{LaunchSpec, OfficeLauncher, OfficeProcess, ProcessExit};
use officepool_core::port::process_monitor::{ProcessError, OFFICE_EXECUTABLE};

/// Flags every pooled office process is started with
const OFFICE_FLAGS: &[&str] = &[
    "--headless",
    "--invisible",
    "--nocrashreport",
    "--nodefault",
    "--nofirststartwizard",
    "--nolockcheck",
    "--nologo",
    "--norestore",
];

/// Spawns `soffice` as a child process
#[derive(Debug, Default)]
pub struct SubprocessOfficeLauncher;

impl SubprocessOfficeLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Path of the office executable below `office_home`
    pub fn executable(office_home: &Path) -> PathBuf {
        office_home.join("program").join(OFFICE_EXECUTABLE)
    }

    /// Program and arguments for one launch, `run_as_args` first
    pub fn command_line(spec: &LaunchSpec) -> (String, Vec<String>) {
        let mut line: Vec<String> = spec.run_as_args.clone();
        line.push(Self::executable(&spec.office_home).display().to_string());
        line.push(format!("--accept={}", spec.endpoint.accept_argument()));
        line.extend(OFFICE_FLAGS.iter().map(|flag| flag.to_string()));
        line.push(format!(
            "-env:UserInstallation={}",
            file_url(&spec.instance_profile_dir)
        ));

        let program = line.remove(0);
        (program, line)
    }
}

#[async_trait]
impl OfficeLauncher for SubprocessOfficeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn OfficeProcess>, ProcessError> {
        prepare_profile_dir(spec).await?;

        let (program, args) = Self::command_line(spec);
        info!(
            endpoint = %spec.endpoint,
            program = %program,
            args = ?args,
            "Launching office process"
        );

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ProcessError::LaunchFailed(format!("{}: {}", program, e)))?;

        Ok(Box::new(OfficeChild { child }))
    }
}

/// Create the instance profile dir, seeding it from the template on first use
async fn prepare_profile_dir(spec: &LaunchSpec) -> Result<(), ProcessError> {
    let target = spec.instance_profile_dir.clone();
    let template = spec.template_profile_dir.clone();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if target.exists() {
            return Ok(());
        }
        match template {
            Some(template) => {
                debug!(from = %template.display(), to = %target.display(), "Copying template profile");
                copy_dir_recursive(&template, &target)
            }
            None => std::fs::create_dir_all(&target),
        }
    })
    .await
    .map_err(|e| ProcessError::IoError(e.to_string()))?
    .map_err(|e| ProcessError::IoError(format!("profile dir: {}", e)))
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// `file://` URL of a local directory, as office expects for UserInstallation
fn file_url(path: &Path) -> String {
    let raw = path.display().to_string().replace('\\', "/");
    if raw.starts_with('/') {
        format!("file://{}", raw)
    } else {
        format!("file:///{}", raw)
    }
}

fn exit_of(status: std::process::ExitStatus) -> ProcessExit {
    ProcessExit {
        code: status.code(),
    }
}

/// A launched office child process
pub struct OfficeChild {
    child: Child,
}

#[async_trait]
impl OfficeProcess for OfficeChild {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> Result<Option<ProcessExit>, ProcessError> {
        self.child
            .try_wait()
            .map(|status| status.map(exit_of))
            .map_err(|e| ProcessError::IoError(e.to_string()))
    }

    async fn wait_for_exit(&mut self, limit: Duration) -> Option<ProcessExit> {
        match timeout(limit, self.child.wait()).await {
            Ok(Ok(status)) => Some(exit_of(status)),
            Ok(Err(e)) => {
                warn!(error = %e, "Waiting for office process failed");
                None
            }
            Err(_) => None,
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        let pid = self.child.id().unwrap_or(0);
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(ProcessError::KillFailed {
                pid,
                reason: e.to_string(),
            }),
        }
    }
}
