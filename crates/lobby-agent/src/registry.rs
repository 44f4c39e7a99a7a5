use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use lobby_process::{GameServerAddress, InstanceId, InstanceSnapshot, InstanceState, LobbyId};
use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;

/// Handle to a spawned game server.
///
/// The launch task owns the child process; the registry entry owns this handle.
/// Destroying it asks the launch task to kill the worker. Destroying twice, or
/// after the worker already exited, does nothing.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pid: Option<u32>,
    kill: CancellationToken,
}

impl WorkerHandle {
    pub fn new(pid: Option<u32>, kill: CancellationToken) -> Self {
        Self { pid, kill }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn destroy(&self) {
        self.kill.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.kill.is_cancelled()
    }
}

#[derive(Debug)]
struct GameInstance {
    instance_id: InstanceId,
    state: InstanceState,
    capacity: u16,
    occupancy: u16,
    worker: Option<WorkerHandle>,
    address: Option<GameServerAddress>,
    registered_at_unix_ms: u64,
}

impl GameInstance {
    fn destroy(&self) {
        if let Some(worker) = &self.worker {
            worker.destroy();
        }
    }

    fn snapshot(&self, lobby_id: LobbyId) -> InstanceSnapshot {
        InstanceSnapshot {
            lobby_id,
            instance_id: self.instance_id.clone(),
            state: self.state,
            capacity: self.capacity,
            occupancy: self.occupancy,
            pid: self.worker.as_ref().and_then(WorkerHandle::pid),
            address: self.address.clone(),
            registered_at_unix_ms: self.registered_at_unix_ms,
        }
    }
}

/// Active game instances keyed by lobby.
///
/// Every mutation holds the entry's shard lock for its whole duration, so
/// operations on one lobby are linearizable while other lobbies proceed.
#[derive(Clone, Debug, Default)]
pub struct InstanceRegistry {
    instances: Arc<DashMap<LobbyId, GameInstance>>,
}

impl InstanceRegistry {
    pub fn register(&self, lobby_id: LobbyId, capacity: u16) -> Result<InstanceId, OrchestratorError> {
        if capacity == 0 {
            return Err(OrchestratorError::InvalidCapacity { lobby_id, capacity });
        }

        match self.instances.entry(lobby_id) {
            Entry::Occupied(_) => Err(OrchestratorError::DuplicateInstance(lobby_id)),
            Entry::Vacant(slot) => {
                let instance_id = InstanceId::new();
                slot.insert(GameInstance {
                    instance_id: instance_id.clone(),
                    state: InstanceState::Pending,
                    capacity,
                    occupancy: capacity,
                    worker: None,
                    address: None,
                    registered_at_unix_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
                });
                Ok(instance_id)
            }
        }
    }

    /// Attach the spawned worker. Fails if the instance was removed meanwhile;
    /// the caller then owns a worker nobody tracks and must kill it.
    pub fn record_worker(
        &self,
        lobby_id: LobbyId,
        instance_id: &InstanceId,
        worker: WorkerHandle,
    ) -> Result<(), OrchestratorError> {
        let mut entry = self
            .instances
            .get_mut(&lobby_id)
            .filter(|e| &e.instance_id == instance_id)
            .ok_or(OrchestratorError::UnknownInstance(lobby_id))?;

        if let Some(old) = entry.worker.replace(worker) {
            tracing::warn!(%lobby_id, pid = ?old.pid(), "replacing worker handle; destroying the old one");
            old.destroy();
        }
        Ok(())
    }

    /// Pending -> Running. Returns false if the instance is gone.
    pub fn mark_running(
        &self,
        lobby_id: LobbyId,
        instance_id: &InstanceId,
        address: GameServerAddress,
    ) -> bool {
        let Some(mut entry) = self.instances.get_mut(&lobby_id) else {
            return false;
        };
        if &entry.instance_id != instance_id {
            return false;
        }
        entry.state = InstanceState::Running;
        entry.address = Some(address);
        true
    }

    /// Returns the remaining occupancy. Reaching zero destroys the worker and
    /// removes the instance before the shard lock is released.
    pub fn decrement_occupancy(&self, lobby_id: LobbyId) -> Result<u16, OrchestratorError> {
        match self.instances.entry(lobby_id) {
            Entry::Vacant(_) => Err(OrchestratorError::UnknownInstance(lobby_id)),
            Entry::Occupied(mut slot) => {
                let remaining = slot.get().occupancy.saturating_sub(1);
                if remaining == 0 {
                    let instance = slot.remove();
                    instance.destroy();
                } else {
                    slot.get_mut().occupancy = remaining;
                }
                Ok(remaining)
            }
        }
    }

    /// Remove one specific launch of a lobby. Idempotent.
    pub fn remove(&self, lobby_id: LobbyId, instance_id: &InstanceId) -> bool {
        match self
            .instances
            .remove_if(&lobby_id, |_, e| &e.instance_id == instance_id)
        {
            Some((_, instance)) => {
                instance.destroy();
                true
            }
            None => false,
        }
    }

    /// Destroy every worker and clear the registry. Reserved for shutdown and
    /// operator resets.
    pub fn terminate_all(&self) -> usize {
        let mut terminated = 0;
        self.instances.retain(|lobby_id, instance| {
            tracing::debug!(%lobby_id, pid = ?instance.worker.as_ref().and_then(WorkerHandle::pid), "terminating game instance");
            instance.destroy();
            terminated += 1;
            false
        });
        terminated
    }

    pub fn get(&self, lobby_id: LobbyId) -> Option<InstanceSnapshot> {
        self.instances.get(&lobby_id).map(|e| e.snapshot(lobby_id))
    }

    pub fn snapshots(&self) -> Vec<InstanceSnapshot> {
        let mut out: Vec<_> = self
            .instances
            .iter()
            .map(|e| e.value().snapshot(*e.key()))
            .collect();
        out.sort_by_key(|s| s.lobby_id);
        out
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
