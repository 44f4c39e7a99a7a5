use std::sync::Arc;

use anyhow::Context;
use lobby_agent::{
    GameInstanceService,
    config::AgentConfig,
    console::{Console, ConsoleExit},
    server_logs::ServerLogs,
    store::MemoryLobbyStore,
};
use tokio::io::BufReader;

async fn shutdown_signal() -> anyhow::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = sigint.recv() => Ok("SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("install ctrl-c handler")?;
        Ok("ctrl-c")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries console replies; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = AgentConfig::load().context("load lobby-agent config")?;
    let logs = match &config.log_dir {
        Some(dir) => ServerLogs::in_dir(dir)
            .with_context(|| format!("open game server log dir {}", dir.display()))?,
        None => ServerLogs::temporary().context("create game server log dir")?,
    };
    let logs = Arc::new(logs);
    tracing::info!(
        executable = %config.executable.display(),
        instance_host = %config.instance_host,
        handshake_timeout_ms = config.handshake_timeout().as_millis() as u64,
        log_dir = %logs.path().display(),
        "lobby-agent starting"
    );

    let service = GameInstanceService::new(&config, logs.clone(), Arc::new(MemoryLobbyStore::default()));
    service.start();

    let console = Console::new(service.clone(), logs);
    let operator = async {
        let stdin = BufReader::new(tokio::io::stdin());
        match console.run(stdin, tokio::io::stdout()).await {
            Ok(ConsoleExit::Quit) => {}
            Ok(ConsoleExit::Eof) => {
                tracing::info!("stdin closed; waiting for a shutdown signal");
                std::future::pending::<()>().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "console failed; waiting for a shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        signal = shutdown_signal() => {
            let signal = signal?;
            tracing::info!(signal, "shutdown signal received");
        }
        _ = operator => tracing::info!("quit requested from console"),
    }

    let terminated = service.stop().await;
    tracing::info!(terminated, "lobby-agent stopped");
    Ok(())
}
