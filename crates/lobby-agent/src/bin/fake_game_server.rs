//! Minimal game server for manual runs and end-to-end tests.
//!
//! Usage: `fake-game-server <handshake-port>`. Connects back to the lobby server,
//! reads the capacity, binds a player port, reports it, then greets every player
//! until SIGTERM.

use anyhow::Context;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

const LOBBY_HOST_ENV: &str = "FAKE_GAME_SERVER_LOBBY_HOST";

/// Registers the handler right away; the returned future resolves on SIGTERM.
#[cfg(unix)]
fn on_terminate() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    Ok(async move {
        term.recv().await;
    })
}

#[cfg(not(unix))]
fn on_terminate() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let terminated = on_terminate().context("install SIGTERM handler")?;
    tokio::pin!(terminated);

    let port: u16 = std::env::args()
        .nth(1)
        .context("missing handshake port argument")?
        .parse()
        .context("handshake port must be a number")?;
    let host = std::env::var(LOBBY_HOST_ENV).unwrap_or_else(|_| "127.0.0.1".to_string());

    let mut lobby = TcpStream::connect((host.as_str(), port))
        .await
        .with_context(|| format!("connect to lobby server at {host}:{port}"))?;
    let capacity = lobby.read_u16().await.context("read capacity")?;

    let players = TcpListener::bind(("0.0.0.0", 0))
        .await
        .context("bind player port")?;
    let player_port = players.local_addr()?.port();
    lobby.write_u16(player_port).await.context("report player port")?;
    lobby.flush().await?;

    println!("fake game server for {capacity} players listening on {player_port}");

    loop {
        tokio::select! {
            accepted = players.accept() => {
                let (mut player, peer) = accepted?;
                println!("player connected from {peer}");
                tokio::spawn(async move {
                    let _ = player.write_all(b"welcome\n").await;
                });
            }
            _ = &mut terminated => {
                println!("fake game server shutting down");
                return Ok(());
            }
        }
    }
}
