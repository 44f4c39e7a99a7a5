use std::sync::Arc;

use lobby_process::{GameServerAddress, InstanceSnapshot, LobbyId, ServiceState};
use tokio::sync::oneshot;

use crate::{
    config::AgentConfig,
    error::OrchestratorError,
    handshake::{HandshakeCoordinator, LaunchOutcome},
    launcher::{LaunchRequest, ProcessLauncher, WorkerLauncher},
    lifecycle::{LaunchGuard, LifecycleController},
    registry::InstanceRegistry,
    server_logs::LogSink,
    store::LobbyStore,
};

/// Game servers for lobbies: one per lobby, started on demand, torn down when
/// the last player leaves or the orchestrator stops.
#[derive(Clone)]
pub struct GameInstanceService {
    registry: InstanceRegistry,
    lifecycle: Arc<LifecycleController>,
    coordinator: Arc<HandshakeCoordinator>,
    launcher: Arc<dyn WorkerLauncher>,
}

impl GameInstanceService {
    pub fn new(config: &AgentConfig, logs: Arc<dyn LogSink>, store: Arc<dyn LobbyStore>) -> Self {
        let launcher = Arc::new(
            ProcessLauncher::new(config.executable.clone(), logs).with_stop_grace(config.stop_grace()),
        );
        Self::with_launcher(config, launcher, store)
    }

    pub fn with_launcher(
        config: &AgentConfig,
        launcher: Arc<dyn WorkerLauncher>,
        store: Arc<dyn LobbyStore>,
    ) -> Self {
        let registry = InstanceRegistry::default();
        Self {
            lifecycle: Arc::new(LifecycleController::new(registry.clone())),
            coordinator: Arc::new(HandshakeCoordinator::new(config, store)),
            registry,
            launcher,
        }
    }

    pub fn start(&self) -> bool {
        self.lifecycle.start()
    }

    /// Kill every game server and wait for their launch tasks to unwind.
    pub async fn stop(&self) -> usize {
        self.lifecycle.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    /// Launch the lobby's game server and wait (bounded) for its handshake.
    ///
    /// On failure the instance is removed again so the lobby can be retried.
    pub async fn start_instance(
        &self,
        lobby_id: LobbyId,
        capacity: u16,
    ) -> Result<GameServerAddress, OrchestratorError> {
        let guard = self.lifecycle.enter()?;
        let instance_id = self.registry.register(lobby_id, capacity)?;
        tracing::info!(%lobby_id, capacity, %instance_id, "starting game instance");

        let result = self
            .coordinator
            .run(
                lobby_id,
                capacity,
                |handshake_port| {
                    self.spawn_launch(
                        guard,
                        LaunchRequest {
                            lobby_id,
                            instance_id: instance_id.clone(),
                            handshake_port,
                        },
                    )
                },
                |address| self.registry.mark_running(lobby_id, &instance_id, address.clone()),
            )
            .await;

        if let Err(err) = &result {
            tracing::warn!(%lobby_id, code = err.code(), error = %err, "game instance failed to start");
            self.registry.remove(lobby_id, &instance_id);
        }
        result
    }

    fn spawn_launch(
        &self,
        guard: LaunchGuard,
        request: LaunchRequest,
    ) -> oneshot::Receiver<LaunchOutcome> {
        let (tx, rx) = oneshot::channel();
        let launcher = self.launcher.clone();
        let registry = self.registry.clone();

        tokio::spawn(async move {
            let lobby_id = request.lobby_id;
            let outcome = launcher
                .launch(request, registry, guard.shutdown_token())
                .await;
            if let Err(err) = &outcome {
                tracing::warn!(%lobby_id, code = err.code(), error = %err, "launch task failed");
            }
            let _ = tx.send(outcome);
            drop(guard);
        });

        rx
    }

    /// Returns the players still in the game. The last one leaving shuts the
    /// game server down.
    pub fn player_left(&self, lobby_id: LobbyId) -> Result<u16, OrchestratorError> {
        let remaining = self.registry.decrement_occupancy(lobby_id)?;
        if remaining == 0 {
            tracing::info!(%lobby_id, "all players left the game, shutting down server");
        } else {
            tracing::debug!(%lobby_id, remaining, "player left the game");
        }
        Ok(remaining)
    }

    /// Operator reset: destroy all game servers without stopping the service.
    pub fn terminate_all(&self) -> usize {
        let terminated = self.registry.terminate_all();
        tracing::info!(terminated, "terminated all game instances");
        terminated
    }

    pub fn instance(&self, lobby_id: LobbyId) -> Option<InstanceSnapshot> {
        self.registry.get(lobby_id)
    }

    pub fn instances(&self) -> Vec<InstanceSnapshot> {
        self.registry.snapshots()
    }

    pub fn in_flight_launches(&self) -> usize {
        self.lifecycle.in_flight()
    }
}
