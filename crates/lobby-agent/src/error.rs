use std::{io, path::PathBuf};

use lobby_process::{LobbyId, ServiceState};
use thiserror::Error;

/// Errors scoped to one game instance, plus the service gate.
///
/// None of these are fatal to the orchestrator; callers decide whether to retry.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("game instance for lobby {0} already exists")]
    DuplicateInstance(LobbyId),

    #[error("game instance for lobby {0} does not exist")]
    UnknownInstance(LobbyId),

    #[error("lobby {lobby_id} has invalid capacity {capacity}")]
    InvalidCapacity { lobby_id: LobbyId, capacity: u16 },

    #[error("game server executable unusable at {}: {reason}", path.display())]
    LaunchConfig { path: PathBuf, reason: String },

    #[error("failed to spawn game server for lobby {lobby_id}: {source}")]
    ProcessSpawn {
        lobby_id: LobbyId,
        #[source]
        source: io::Error,
    },

    #[error("failed to allocate handshake port: {0}")]
    PortAllocation(#[source] io::Error),

    #[error("game server for lobby {lobby_id} did not connect within {timeout_ms}ms")]
    HandshakeTimeout { lobby_id: LobbyId, timeout_ms: u64 },

    #[error("handshake with game server for lobby {lobby_id} failed: {source}")]
    HandshakeIo {
        lobby_id: LobbyId,
        #[source]
        source: io::Error,
    },

    #[error("game server for lobby {lobby_id} exited before the handshake (code {code:?})")]
    WorkerExited { lobby_id: LobbyId, code: Option<i32> },

    #[error("orchestrator is not running (state {0:?})")]
    ServiceNotRunning(ServiceState),
}

impl OrchestratorError {
    /// Stable machine-readable code for operator-facing payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateInstance(_) => "duplicate_instance",
            Self::UnknownInstance(_) => "unknown_instance",
            Self::InvalidCapacity { .. } => "invalid_capacity",
            Self::LaunchConfig { .. } => "launch_config",
            Self::ProcessSpawn { .. } => "spawn_failed",
            Self::PortAllocation(_) => "port_allocation",
            Self::HandshakeTimeout { .. } => "handshake_timeout",
            Self::HandshakeIo { .. } => "handshake_io",
            Self::WorkerExited { .. } => "worker_exited",
            Self::ServiceNotRunning(_) => "service_not_running",
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::DuplicateInstance(_) => Some("The lobby already has a game server; join it instead."),
            Self::LaunchConfig { .. } => Some(
                "Point LOBBY_GAME_SERVER_EXECUTABLE at an existing executable file.",
            ),
            Self::HandshakeTimeout { .. } => Some(
                "Check the game server log; it must connect back to the port passed as its argument.",
            ),
            Self::ServiceNotRunning(_) => Some("Start the orchestrator before launching instances."),
            _ => None,
        }
    }
}
