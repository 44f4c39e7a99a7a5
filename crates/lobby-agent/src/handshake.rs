use std::{sync::Arc, time::Duration};

use lobby_process::{GameServerAddress, LobbyId, ServiceState};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::oneshot,
};

use crate::{
    config::AgentConfig,
    error::OrchestratorError,
    launcher::{ExitCause, WorkerExit},
    port_alloc,
    store::LobbyStore,
};

pub type LaunchOutcome = Result<WorkerExit, OrchestratorError>;

/// Coordinator side of the handshake: send the lobby capacity, receive the
/// port the game server accepts players on. Both as big-endian u16.
pub async fn exchange<S>(stream: &mut S, capacity: u16) -> std::io::Result<u16>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_u16(capacity).await?;
    stream.flush().await?;
    stream.read_u16().await
}

async fn launch_ended(outcome: &mut oneshot::Receiver<LaunchOutcome>) -> LaunchOutcome {
    match outcome.await {
        Ok(outcome) => outcome,
        // Launch task vanished without reporting; let the timeout decide.
        Err(_) => std::future::pending().await,
    }
}

fn ended_early(lobby_id: LobbyId, outcome: LaunchOutcome) -> OrchestratorError {
    match outcome {
        Ok(WorkerExit {
            code,
            cause: ExitCause::Exited,
        }) => OrchestratorError::WorkerExited { lobby_id, code },
        Ok(WorkerExit {
            cause: ExitCause::Destroyed,
            ..
        }) => OrchestratorError::UnknownInstance(lobby_id),
        Ok(WorkerExit {
            cause: ExitCause::Shutdown,
            ..
        }) => OrchestratorError::ServiceNotRunning(ServiceState::Stopping),
        Err(err) => err,
    }
}

/// Learns where a freshly launched game server listens.
pub struct HandshakeCoordinator {
    bind_host: String,
    instance_host: String,
    timeout: Duration,
    store: Arc<dyn LobbyStore>,
}

impl HandshakeCoordinator {
    pub fn new(config: &AgentConfig, store: Arc<dyn LobbyStore>) -> Self {
        Self {
            bind_host: config.bind_host.clone(),
            instance_host: config.instance_host.clone(),
            timeout: config.handshake_timeout(),
            store,
        }
    }

    /// Bind a handshake port, hand it to `launch`, and complete the handshake
    /// with whatever connects first. `launch` must start the worker without
    /// blocking and report how the launch ended.
    ///
    /// `activate` runs once the worker's port is known; the address is only
    /// reported to the store if it returns true.
    pub async fn run<F, A>(
        &self,
        lobby_id: LobbyId,
        capacity: u16,
        launch: F,
        activate: A,
    ) -> Result<GameServerAddress, OrchestratorError>
    where
        F: FnOnce(u16) -> oneshot::Receiver<LaunchOutcome>,
        A: FnOnce(&GameServerAddress) -> bool,
    {
        let (listener, port) = port_alloc::bind_ephemeral(&self.bind_host)
            .await
            .map_err(OrchestratorError::PortAllocation)?;
        tracing::debug!(%lobby_id, port, "handshake listener bound");

        let mut outcome = launch(port);

        let mut stream = tokio::select! {
            biased;
            accepted = tokio::time::timeout(self.timeout, listener.accept()) => match accepted {
                Ok(Ok((stream, peer))) => {
                    tracing::debug!(%lobby_id, %peer, "game server connected");
                    stream
                }
                Ok(Err(source)) => return Err(OrchestratorError::HandshakeIo { lobby_id, source }),
                Err(_) => {
                    return Err(OrchestratorError::HandshakeTimeout {
                        lobby_id,
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
            },
            ended = launch_ended(&mut outcome) => return Err(ended_early(lobby_id, ended)),
        };
        // Exactly one connection per launch.
        drop(listener);

        let worker_port = tokio::select! {
            biased;
            res = exchange(&mut stream, capacity) => {
                res.map_err(|source| OrchestratorError::HandshakeIo { lobby_id, source })?
            }
            ended = launch_ended(&mut outcome) => return Err(ended_early(lobby_id, ended)),
        };

        let address = GameServerAddress {
            host: self.instance_host.clone(),
            port: worker_port,
        };
        tracing::info!(%lobby_id, capacity, %address, "game server handshake complete");

        if !activate(&address) {
            tracing::info!(%lobby_id, %address, "game instance ended during the handshake; not publishing");
            return Err(OrchestratorError::UnknownInstance(lobby_id));
        }

        if let Err(err) = self
            .store
            .update_game_server_address(lobby_id, &address.host, address.port)
            .await
        {
            tracing::warn!(%lobby_id, error = %err, "failed to record game server address");
        }

        Ok(address)
    }
}
