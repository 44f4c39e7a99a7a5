use std::collections::HashMap;

use async_trait::async_trait;
use lobby_process::{GameServerAddress, LobbyId};
use tokio::sync::Mutex;

/// Write side of the lobby store, as far as the orchestrator needs it.
#[async_trait]
pub trait LobbyStore: Send + Sync + 'static {
    async fn update_game_server_address(
        &self,
        lobby_id: LobbyId,
        host: &str,
        port: u16,
    ) -> anyhow::Result<()>;
}

/// Keeps the last reported address per lobby. Used by the standalone agent
/// and tests; the production lobby database lives outside this repository.
#[derive(Debug, Default)]
pub struct MemoryLobbyStore {
    addresses: Mutex<HashMap<LobbyId, GameServerAddress>>,
}

impl MemoryLobbyStore {
    pub async fn address(&self, lobby_id: LobbyId) -> Option<GameServerAddress> {
        self.addresses.lock().await.get(&lobby_id).cloned()
    }
}

#[async_trait]
impl LobbyStore for MemoryLobbyStore {
    async fn update_game_server_address(
        &self,
        lobby_id: LobbyId,
        host: &str,
        port: u16,
    ) -> anyhow::Result<()> {
        self.addresses.lock().await.insert(
            lobby_id,
            GameServerAddress {
                host: host.to_string(),
                port,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_update_wins() {
        let store = MemoryLobbyStore::default();
        store
            .update_game_server_address(LobbyId(1), "a", 1000)
            .await
            .unwrap();
        store
            .update_game_server_address(LobbyId(1), "b", 2000)
            .await
            .unwrap();

        let addr = store.address(LobbyId(1)).await.unwrap();
        assert_eq!(addr.host, "b");
        assert_eq!(addr.port, 2000);
        assert!(store.address(LobbyId(2)).await.is_none());
    }
}
