use std::{
    fs::File,
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};

use lobby_process::LobbyId;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const FILE_PREFIX: &str = "game-server-";
const FILE_SUFFIX: &str = ".log";
const DEFAULT_TAIL_BYTES: u64 = 64 * 1024;
const MAX_TAIL_BYTES: u64 = 1024 * 1024;

/// Where game servers write their merged stdout/stderr.
pub trait LogSink: Send + Sync + 'static {
    fn create_log_file(&self, lobby_id: LobbyId) -> std::io::Result<(PathBuf, File)>;
}

#[derive(Debug)]
enum LogDir {
    // Removed together with the service.
    Temp(TempDir),
    Fixed(PathBuf),
}

#[derive(Debug)]
pub struct ServerLogs {
    dir: LogDir,
}

impl ServerLogs {
    pub fn temporary() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("game-server-logs").tempdir()?;
        tracing::info!(path = %dir.path().display(), "game server log directory created");
        Ok(Self {
            dir: LogDir::Temp(dir),
        })
    }

    pub fn in_dir(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;
        Ok(Self {
            dir: LogDir::Fixed(path),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            LogDir::Temp(dir) => dir.path(),
            LogDir::Fixed(path) => path,
        }
    }

    /// Lobby ids that have at least one log file, ascending and deduplicated.
    pub fn logged_lobbies(&self) -> std::io::Result<Vec<LobbyId>> {
        let mut ids: Vec<LobbyId> = self
            .log_files()?
            .into_iter()
            .filter_map(|(id, _)| id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Most recent log file of a lobby. Timestamps in the name sort lexically.
    pub fn latest_log_for_lobby(&self, lobby_id: LobbyId) -> std::io::Result<Option<PathBuf>> {
        let mut matches: Vec<PathBuf> = self
            .log_files()?
            .into_iter()
            .filter(|(id, _)| *id == Some(lobby_id))
            .map(|(_, path)| path)
            .collect();
        matches.sort();
        Ok(matches.pop())
    }

    /// Last `limit_bytes` (0 = default) of the lobby's most recent log.
    pub async fn tail_log(
        &self,
        lobby_id: LobbyId,
        limit_bytes: u64,
    ) -> std::io::Result<Option<String>> {
        let Some(path) = self.latest_log_for_lobby(lobby_id)? else {
            return Ok(None);
        };

        let limit = if limit_bytes == 0 {
            DEFAULT_TAIL_BYTES
        } else {
            limit_bytes.min(MAX_TAIL_BYTES)
        };

        let mut f = tokio::fs::File::open(&path).await?;
        let size = f.metadata().await?.len();
        let start = size.saturating_sub(limit);
        f.seek(SeekFrom::Start(start)).await?;

        let mut buf = Vec::with_capacity((size - start) as usize);
        f.read_to_end(&mut buf).await?;
        // Best-effort UTF-8: the cut may land inside a character.
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn log_files(&self) -> std::io::Result<Vec<(Option<LobbyId>, PathBuf)>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(self.path())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
                out.push((parse_lobby_id(name), entry.path()));
            }
        }
        Ok(out)
    }
}

impl LogSink for ServerLogs {
    fn create_log_file(&self, lobby_id: LobbyId) -> std::io::Result<(PathBuf, File)> {
        let stamp = chrono::Local::now().format("%Y-%m-%dT%H-%M-%S%.3f");
        let base = format!("{FILE_PREFIX}{lobby_id}-{stamp}");

        // Two launches of one lobby within the same millisecond get a counter.
        for attempt in 0..100u32 {
            let name = if attempt == 0 {
                format!("{base}{FILE_SUFFIX}")
            } else {
                format!("{base}.{attempt}{FILE_SUFFIX}")
            };
            let path = self.path().join(name);
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free log file name for lobby {lobby_id}"),
        ))
    }
}

fn parse_lobby_id(file_name: &str) -> Option<LobbyId> {
    let rest = file_name.strip_prefix(FILE_PREFIX)?;
    let (id, _) = rest.split_once('-')?;
    id.parse::<u64>().ok().map(LobbyId)
}
