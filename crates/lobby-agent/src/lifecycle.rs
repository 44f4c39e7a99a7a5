use std::sync::{Mutex, MutexGuard, PoisonError};

use lobby_process::ServiceState;
use tokio_util::{
    sync::CancellationToken,
    task::{TaskTracker, task_tracker::TaskTrackerToken},
};

use crate::{error::OrchestratorError, registry::InstanceRegistry};

#[derive(Debug)]
struct Phase {
    state: ServiceState,
    shutdown: CancellationToken,
}

/// Participant in the shutdown rendezvous. Dropping it deregisters, whether the
/// launch task finished, failed or panicked.
#[derive(Debug)]
pub struct LaunchGuard {
    _token: TaskTrackerToken,
    shutdown: CancellationToken,
}

impl LaunchGuard {
    /// Cancelled as soon as the orchestrator starts stopping.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Start/stop of the orchestrator.
///
/// `stop()` is two-phase: destroy every tracked worker right away, then wait
/// until all launch tasks that registered while running have unwound.
#[derive(Debug)]
pub struct LifecycleController {
    registry: InstanceRegistry,
    phase: Mutex<Phase>,
    launches: TaskTracker,
    stop_serial: tokio::sync::Mutex<()>,
}

impl LifecycleController {
    pub fn new(registry: InstanceRegistry) -> Self {
        let launches = TaskTracker::new();
        launches.close();
        Self {
            registry,
            phase: Mutex::new(Phase {
                state: ServiceState::Stopped,
                shutdown: CancellationToken::new(),
            }),
            launches,
            stop_serial: tokio::sync::Mutex::new(()),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ServiceState {
        self.phase().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    /// Launch tasks currently registered with the rendezvous.
    pub fn in_flight(&self) -> usize {
        self.launches.len()
    }

    /// Returns false if the orchestrator was not stopped.
    pub fn start(&self) -> bool {
        let mut phase = self.phase();
        match phase.state {
            ServiceState::Stopped => {
                phase.state = ServiceState::Running;
                phase.shutdown = CancellationToken::new();
                self.launches.reopen();
                tracing::info!("orchestrator running");
                true
            }
            ServiceState::Running => false,
            ServiceState::Stopping => {
                tracing::warn!("start requested while stopping; ignored");
                false
            }
        }
    }

    /// Register a launch task. Checked and registered under the same lock
    /// `stop()` uses to leave Running, so no launch can slip past the barrier.
    pub fn enter(&self) -> Result<LaunchGuard, OrchestratorError> {
        let phase = self.phase();
        if phase.state != ServiceState::Running {
            return Err(OrchestratorError::ServiceNotRunning(phase.state));
        }
        Ok(LaunchGuard {
            _token: self.launches.token(),
            shutdown: phase.shutdown.clone(),
        })
    }

    /// Returns the number of instances terminated. A concurrent second call
    /// waits for the first shutdown and returns 0.
    pub async fn stop(&self) -> usize {
        let _serial = self.stop_serial.lock().await;

        let shutdown = {
            let mut phase = self.phase();
            if phase.state != ServiceState::Running {
                return 0;
            }
            phase.state = ServiceState::Stopping;
            self.launches.close();
            phase.shutdown.clone()
        };

        shutdown.cancel();
        let terminated = self.registry.terminate_all();
        tracing::info!(
            terminated,
            in_flight = self.launches.len(),
            "orchestrator stopping; waiting for launch tasks"
        );

        self.launches.wait().await;

        self.phase().state = ServiceState::Stopped;
        tracing::info!(terminated, "orchestrator stopped");
        terminated
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use lobby_process::LobbyId;

    use super::*;
    use crate::registry::WorkerHandle;

    fn controller() -> (Arc<LifecycleController>, InstanceRegistry) {
        let registry = InstanceRegistry::default();
        (Arc::new(LifecycleController::new(registry.clone())), registry)
    }

    #[tokio::test]
    async fn state_machine_round_trip() {
        let (lc, _) = controller();
        assert_eq!(lc.state(), ServiceState::Stopped);
        assert!(!lc.is_running());
        assert!(matches!(
            lc.enter(),
            Err(OrchestratorError::ServiceNotRunning(ServiceState::Stopped))
        ));

        assert!(lc.start());
        assert!(!lc.start());
        assert!(lc.is_running());

        assert_eq!(lc.stop().await, 0);
        assert_eq!(lc.state(), ServiceState::Stopped);
        assert_eq!(lc.stop().await, 0);
    }

    #[tokio::test]
    async fn stop_terminates_tracked_instances() {
        let (lc, registry) = controller();
        lc.start();

        let mut kills = Vec::new();
        for lobby in 1..=3 {
            let id = registry.register(LobbyId(lobby), 2).unwrap();
            let kill = CancellationToken::new();
            registry
                .record_worker(LobbyId(lobby), &id, WorkerHandle::new(None, kill.clone()))
                .unwrap();
            kills.push(kill);
        }

        assert_eq!(lc.stop().await, 3);
        assert!(registry.is_empty());
        assert!(kills.iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_in_flight_launches() {
        let (lc, _) = controller();
        lc.start();
        let guard = lc.enter().unwrap();
        let shutdown = guard.shutdown_token();
        assert_eq!(lc.in_flight(), 1);

        let stopping = tokio::spawn({
            let lc = lc.clone();
            async move { lc.stop().await }
        });

        tokio::time::timeout(Duration::from_secs(2), shutdown.cancelled())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());
        assert_eq!(lc.state(), ServiceState::Stopping);
        assert!(!lc.is_running());
        assert!(matches!(
            lc.enter(),
            Err(OrchestratorError::ServiceNotRunning(ServiceState::Stopping))
        ));
        assert!(!lc.start());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(2), stopping)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lc.state(), ServiceState::Stopped);
        assert_eq!(lc.in_flight(), 0);
    }

    #[tokio::test]
    async fn guard_released_by_panicking_task() {
        let (lc, _) = controller();
        lc.start();
        let guard = lc.enter().unwrap();

        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("launch task blew up");
        });
        assert!(task.await.is_err());

        tokio::time::timeout(Duration::from_secs(2), lc.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn restart_after_stop_rearms_barrier() {
        let (lc, _) = controller();
        lc.start();
        let old = lc.enter().unwrap().shutdown_token();
        lc.stop().await;
        assert!(old.is_cancelled());

        assert!(lc.start());
        let guard = lc.enter().unwrap();
        assert!(!guard.shutdown_token().is_cancelled());
        drop(guard);
        lc.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_stops_both_complete() {
        let (lc, registry) = controller();
        lc.start();
        registry.register(LobbyId(1), 1).unwrap();

        let a = tokio::spawn({
            let lc = lc.clone();
            async move { lc.stop().await }
        });
        let b = tokio::spawn({
            let lc = lc.clone();
            async move { lc.stop().await }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(a + b, 1);
        assert_eq!(lc.state(), ServiceState::Stopped);
    }
}
