//! Lifecycle supervision for the local prediction service.
//!
//! The supervisor launches the service, polls its log for a readiness or
//! port-conflict marker, and on conflict terminates the holders of the port
//! and relaunches. Restarts are bounded; exceeding the bound or exhausting
//! the poll budget fails the startup rather than hanging or recursing
//! forever.

use crate::error::PipelineError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

/// Log line that marks the service as ready to accept requests.
const READY_MARKER: &str = "Application startup complete.";

/// Log line that marks a failed bind on the service port.
const CONFLICT_MARKER: &str = "Address already in use";

/// Observable states of the supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Ready,
    PortConflict,
    Terminating,
    Restarting,
    Failed,
}

/// Host-side operations the supervisor needs. Split out so the startup
/// logic can be driven by scripted implementations in tests.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Launch the service process, detached, with its output captured.
    async fn launch(&self) -> Result<()>;

    /// The current contents of the service log.
    async fn read_log(&self) -> Result<String>;

    /// Process ids currently holding the service port.
    async fn port_holders(&self) -> Result<Vec<u32>>;

    /// Forcibly terminate one process. Best effort; the process may already
    /// be gone.
    async fn terminate(&self, pid: u32) -> Result<()>;
}

#[async_trait]
impl<T: ServiceControl + ?Sized> ServiceControl for std::sync::Arc<T> {
    async fn launch(&self) -> Result<()> {
        (**self).launch().await
    }

    async fn read_log(&self) -> Result<String> {
        (**self).read_log().await
    }

    async fn port_holders(&self) -> Result<Vec<u32>> {
        (**self).port_holders().await
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        (**self).terminate(pid).await
    }
}

/// Startup policy: how long to poll and how many relaunches to allow.
#[derive(Debug, Clone)]
pub struct SupervisorPolicy {
    pub poll_interval: Duration,
    pub poll_budget: usize,
    pub max_restarts: usize,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_budget: 30,
            max_restarts: 3,
        }
    }
}

/// Drives a [`ServiceControl`] through startup until the service is ready
/// or the policy is exhausted.
pub struct Supervisor<C> {
    control: C,
    policy: SupervisorPolicy,
}

impl<C: ServiceControl> Supervisor<C> {
    pub fn new(control: C, policy: SupervisorPolicy) -> Self {
        Self { control, policy }
    }

    /// Bring the service up. Returns once the readiness marker appears.
    pub async fn start(&self) -> Result<()> {
        let mut restarts = 0;

        loop {
            tracing::info!("launching prediction service");
            self.control.launch().await?;

            match self.poll_until_settled().await? {
                ServiceState::Ready => {
                    tracing::info!("prediction service ready");
                    return Ok(());
                }
                ServiceState::PortConflict => {
                    if restarts >= self.policy.max_restarts {
                        return Err(PipelineError::ServiceStartup {
                            reason: format!(
                                "port still in conflict after {} restarts",
                                restarts
                            ),
                        }
                        .into());
                    }
                    restarts += 1;
                    tracing::warn!(
                        "service port in use, clearing holders (restart {} of {})",
                        restarts,
                        self.policy.max_restarts
                    );
                    self.clear_port().await?;
                }
                _ => {
                    return Err(PipelineError::ServiceStartup {
                        reason: format!(
                            "no readiness marker within {} polls",
                            self.policy.poll_budget
                        ),
                    }
                    .into());
                }
            }
        }
    }

    /// Poll the log until a marker appears or the budget runs out.
    async fn poll_until_settled(&self) -> Result<ServiceState> {
        for _ in 0..self.policy.poll_budget {
            let log = self.control.read_log().await.unwrap_or_default();
            if log.contains(READY_MARKER) {
                return Ok(ServiceState::Ready);
            }
            if log.contains(CONFLICT_MARKER) {
                return Ok(ServiceState::PortConflict);
            }
            tokio::time::sleep(self.policy.poll_interval).await;
        }
        Ok(ServiceState::Failed)
    }

    /// Terminate every process holding the service port.
    async fn clear_port(&self) -> Result<()> {
        let pids = self.control.port_holders().await?;
        for pid in pids {
            tracing::info!("terminating process {} holding the service port", pid);
            if let Err(e) = self.control.terminate(pid).await {
                tracing::warn!("failed to terminate {}: {}", pid, e);
            }
        }
        Ok(())
    }
}

/// Real host control: launches the service via a shell command, captures its
/// output into a log file, and resolves port holders with `lsof`.
pub struct ProcessControl {
    command: String,
    working_dir: Option<PathBuf>,
    log_file: PathBuf,
    port: u16,
}

impl ProcessControl {
    pub fn new(
        command: impl Into<String>,
        working_dir: Option<PathBuf>,
        log_file: impl Into<PathBuf>,
        port: u16,
    ) -> Self {
        Self {
            command: command.into(),
            working_dir,
            log_file: log_file.into(),
            port,
        }
    }
}

#[async_trait]
impl ServiceControl for ProcessControl {
    async fn launch(&self) -> Result<()> {
        // Truncate so markers from a previous launch cannot be re-read.
        let log = std::fs::File::create(&self.log_file)
            .with_context(|| format!("creating service log {}", self.log_file.display()))?;
        let log_err = log.try_clone().context("cloning service log handle")?;

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.spawn()
            .with_context(|| format!("spawning service command: {}", self.command))?;
        Ok(())
    }

    async fn read_log(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.log_file)
            .await
            .unwrap_or_default())
    }

    async fn port_holders(&self) -> Result<Vec<u32>> {
        let output = tokio::process::Command::new("lsof")
            .args(["-t", "-i", &format!(":{}", self.port)])
            .output()
            .await
            .context("running lsof")?;

        let pids = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect();
        Ok(pids)
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        tokio::process::Command::new("kill")
            .args(["-9", &pid.to_string()])
            .output()
            .await
            .context("running kill")?;
        Ok(())
    }
}
