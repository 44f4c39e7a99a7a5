use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use lobby_process::{InstanceId, LobbyId, ServiceState};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::{
    error::OrchestratorError,
    registry::{InstanceRegistry, WorkerHandle},
    server_logs::LogSink,
};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub lobby_id: LobbyId,
    pub instance_id: InstanceId,
    pub handshake_port: u16,
}

/// Why a worker is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// Exited on its own.
    Exited,
    /// Its handle was destroyed: last player left, reset, or failed handshake.
    Destroyed,
    /// The orchestrator is stopping.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub cause: ExitCause,
}

/// Runs one game server from spawn to exit.
///
/// Implementations record the worker in the registry once it exists, return
/// when it is gone, and remove their instance on the way out. Destroying the
/// recorded handle or cancelling `shutdown` must end the worker.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn launch(
        &self,
        request: LaunchRequest,
        registry: InstanceRegistry,
        shutdown: CancellationToken,
    ) -> Result<WorkerExit, OrchestratorError>;
}

pub struct ProcessLauncher {
    executable: PathBuf,
    logs: Arc<dyn LogSink>,
    stop_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(executable: impl Into<PathBuf>, logs: Arc<dyn LogSink>) -> Self {
        Self {
            executable: executable.into(),
            logs,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// How long a worker may take to exit after SIGTERM before it is killed.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn resolve_executable(&self) -> Result<PathBuf, OrchestratorError> {
        check_executable(&self.executable)?;
        Ok(self.executable.clone())
    }
}

fn check_executable(path: &Path) -> Result<(), OrchestratorError> {
    let unusable = |reason: String| OrchestratorError::LaunchConfig {
        path: path.to_path_buf(),
        reason,
    };

    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => unusable("not found".to_string()),
        _ => unusable(e.to_string()),
    })?;
    if !meta.is_file() {
        return Err(unusable("not a regular file".to_string()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(unusable("not executable".to_string()));
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // Game servers must not outlive a crashed agent.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// An instance removed by `stop()` while its worker was starting reports the
/// shutdown rather than a missing instance.
pub fn removed_while_starting(err: OrchestratorError, shutdown: &CancellationToken) -> OrchestratorError {
    match err {
        OrchestratorError::UnknownInstance(_) if shutdown.is_cancelled() => {
            OrchestratorError::ServiceNotRunning(ServiceState::Stopping)
        }
        other => other,
    }
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: libc::c_int) {
    // The child is not reaped yet, so its pid (== pgid after setsid) cannot
    // have been reused.
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

/// SIGTERM the worker's process group, give it `grace` to exit, then SIGKILL
/// and reap.
async fn terminate(
    child: &mut Child,
    pid: Option<u32>,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGTERM);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status,
            Err(_) => {
                tracing::warn!(?pid, grace_ms = grace.as_millis() as u64, "game server ignored SIGTERM; killing");
                signal_group(pid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(err) = child.start_kill() {
        tracing::debug!(?pid, error = %err, "game server already exited");
    }
    child.wait().await
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        request: LaunchRequest,
        registry: InstanceRegistry,
        shutdown: CancellationToken,
    ) -> Result<WorkerExit, OrchestratorError> {
        let LaunchRequest {
            lobby_id,
            instance_id,
            handshake_port,
        } = request;

        let executable = self.resolve_executable()?;
        if shutdown.is_cancelled() {
            return Err(OrchestratorError::ServiceNotRunning(ServiceState::Stopping));
        }

        let spawn_err = |source: std::io::Error| OrchestratorError::ProcessSpawn { lobby_id, source };
        let (log_path, stdout_log) = self.logs.create_log_file(lobby_id).map_err(spawn_err)?;
        let stderr_log = stdout_log.try_clone().map_err(spawn_err)?;

        let mut cmd = Command::new(&executable);
        cmd.arg(handshake_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    set_parent_death_signal()?;
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(spawn_err)?;
        let pid = child.id();
        tracing::info!(
            %lobby_id,
            ?pid,
            handshake_port,
            exec = %executable.display(),
            log = %log_path.display(),
            "game server started"
        );

        let kill = CancellationToken::new();
        if let Err(err) = registry.record_worker(lobby_id, &instance_id, WorkerHandle::new(pid, kill.clone())) {
            tracing::warn!(%lobby_id, ?pid, "instance removed while its game server was starting; killing it");
            if let Err(wait_err) = terminate(&mut child, pid, self.stop_grace).await {
                tracing::warn!(%lobby_id, ?pid, error = %wait_err, "failed to reap game server");
            }
            return Err(removed_while_starting(err, &shutdown));
        }

        let (status, cause) = tokio::select! {
            res = child.wait() => (res, ExitCause::Exited),
            _ = kill.cancelled() => (terminate(&mut child, pid, self.stop_grace).await, ExitCause::Destroyed),
            _ = shutdown.cancelled() => (terminate(&mut child, pid, self.stop_grace).await, ExitCause::Shutdown),
        };

        registry.remove(lobby_id, &instance_id);

        let code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                tracing::warn!(%lobby_id, ?pid, error = %err, "failed to wait for game server");
                None
            }
        };
        tracing::info!(%lobby_id, ?pid, ?code, ?cause, "game server exited");

        Ok(WorkerExit { code, cause })
    }
}
