use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use serde::Deserialize;

const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_STOP_GRACE_MS: u64 = 5000;
const DEFAULT_INSTANCE_HOST: &str = "127.0.0.1";
const DEFAULT_BIND_HOST: &str = "127.0.0.1";
const DEFAULT_EXECUTABLE: &str = "./game-server";

pub const CONFIG_PATH_ENV: &str = "LOBBY_AGENT_CONFIG";

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|v| v.trim().parse::<u64>().ok())
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Game server binary, invoked with the handshake port as its only argument.
    pub executable: PathBuf,
    /// Host advertised to players once a game server is up.
    pub instance_host: String,
    /// Interface the handshake listener binds to.
    pub bind_host: String,
    pub handshake_timeout_ms: u64,
    /// Time between SIGTERM and SIGKILL when a game server is destroyed.
    pub stop_grace_ms: u64,
    /// Fixed directory for game server logs; a temporary one is used when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            instance_host: DEFAULT_INSTANCE_HOST.to_string(),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            log_dir: None,
        }
    }
}

impl AgentConfig {
    /// Defaults, then the optional TOML file, then `LOBBY_*` environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                let text = std::fs::read_to_string(path.trim())
                    .with_context(|| format!("read config file {path}"))?;
                Self::from_toml_str(&text).with_context(|| format!("parse config file {path}"))?
            }
            _ => Self::default(),
        };
        cfg.apply_env_with(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let mut cfg: Self = toml::from_str(text)?;
        cfg.handshake_timeout_ms = clamp_timeout_ms(cfg.handshake_timeout_ms);
        cfg.stop_grace_ms = clamp_grace_ms(cfg.stop_grace_ms);
        Ok(cfg)
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = non_empty(lookup("LOBBY_GAME_SERVER_EXECUTABLE")) {
            self.executable = PathBuf::from(v);
        }
        if let Some(v) = non_empty(lookup("LOBBY_GAME_SERVER_HOST")) {
            self.instance_host = v;
        }
        if let Some(v) = non_empty(lookup("LOBBY_HANDSHAKE_BIND_HOST")) {
            self.bind_host = v;
        }
        if let Some(v) = parse_u64(lookup("LOBBY_HANDSHAKE_TIMEOUT_MS")) {
            self.handshake_timeout_ms = clamp_timeout_ms(v);
        }
        if let Some(v) = parse_u64(lookup("LOBBY_STOP_GRACE_MS")) {
            self.stop_grace_ms = clamp_grace_ms(v);
        }
        if let Some(v) = non_empty(lookup("LOBBY_SERVER_LOG_DIR")) {
            self.log_dir = Some(PathBuf::from(v));
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

fn clamp_timeout_ms(v: u64) -> u64 {
    v.clamp(100, 60_000)
}

fn clamp_grace_ms(v: u64) -> u64 {
    v.clamp(100, 120_000)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_use_two_second_handshake() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.handshake_timeout(), Duration::from_millis(2000));
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn toml_overrides_defaults_and_clamps_timeout() {
        let cfg = AgentConfig::from_toml_str(
            r#"
            executable = "/opt/tetris/server"
            instance_host = "games.example.org"
            handshake_timeout_ms = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.executable, PathBuf::from("/opt/tetris/server"));
        assert_eq!(cfg.instance_host, "games.example.org");
        assert_eq!(cfg.bind_host, DEFAULT_BIND_HOST);
        assert_eq!(cfg.handshake_timeout_ms, 100);
    }

    #[test]
    fn env_overrides_win_and_ignore_garbage() {
        let vars: HashMap<&str, &str> = [
            ("LOBBY_GAME_SERVER_HOST", " 10.0.0.5 "),
            ("LOBBY_HANDSHAKE_TIMEOUT_MS", "not-a-number"),
            ("LOBBY_SERVER_LOG_DIR", "/var/log/lobby"),
            ("LOBBY_HANDSHAKE_BIND_HOST", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = AgentConfig::default();
        cfg.apply_env_with(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.instance_host, "10.0.0.5");
        assert_eq!(cfg.handshake_timeout_ms, DEFAULT_HANDSHAKE_TIMEOUT_MS);
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/var/log/lobby")));
        assert_eq!(cfg.bind_host, DEFAULT_BIND_HOST);
    }

    #[test]
    fn env_timeout_is_clamped() {
        let mut cfg = AgentConfig::default();
        cfg.apply_env_with(|k| (k == "LOBBY_HANDSHAKE_TIMEOUT_MS").then(|| "999999".to_string()));
        assert_eq!(cfg.handshake_timeout_ms, 60_000);
    }

    #[test]
    fn stop_grace_defaults_and_clamps() {
        assert_eq!(AgentConfig::default().stop_grace(), Duration::from_secs(5));

        let mut cfg = AgentConfig::default();
        cfg.apply_env_with(|k| (k == "LOBBY_STOP_GRACE_MS").then(|| "0".to_string()));
        assert_eq!(cfg.stop_grace_ms, 100);

        let cfg = AgentConfig::from_toml_str("stop_grace_ms = 9999999").unwrap();
        assert_eq!(cfg.stop_grace_ms, 120_000);
    }
}
