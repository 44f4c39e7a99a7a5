use std::sync::Arc;

use lobby_process::LobbyId;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::OrchestratorError, error_payload::ErrorPayload, server_logs::ServerLogs,
    service::GameInstanceService,
};

const HELP: &[&str] = &[
    "start <lobby> <capacity>",
    "leave <lobby>",
    "status [lobby]",
    "reset",
    "logs [lobby] [bytes]",
    "help",
    "quit",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { lobby_id: LobbyId, capacity: u16 },
    Leave(LobbyId),
    Status(Option<LobbyId>),
    Reset,
    Logs { lobby_id: Option<LobbyId>, bytes: u64 },
    Help,
    Quit,
}

fn bad_args(usage: &str) -> ErrorPayload {
    ErrorPayload::new("bad_arguments", format!("usage: {usage}"))
}

fn parse_num<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, ErrorPayload> {
    raw.parse()
        .map_err(|_| ErrorPayload::new("bad_arguments", format!("invalid {what}: {raw:?}")))
}

/// Blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<Command>, ErrorPayload> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let cmd = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("start", [lobby, capacity]) => Command::Start {
            lobby_id: LobbyId(parse_num(lobby, "lobby id")?),
            capacity: parse_num(capacity, "capacity")?,
        },
        ("start", _) => return Err(bad_args(HELP[0])),
        ("leave", [lobby]) => Command::Leave(LobbyId(parse_num(lobby, "lobby id")?)),
        ("leave", _) => return Err(bad_args(HELP[1])),
        ("status", []) => Command::Status(None),
        ("status", [lobby]) => Command::Status(Some(LobbyId(parse_num(lobby, "lobby id")?))),
        ("status", _) => return Err(bad_args(HELP[2])),
        ("reset", []) => Command::Reset,
        ("logs", []) => Command::Logs {
            lobby_id: None,
            bytes: 0,
        },
        ("logs", [lobby]) => Command::Logs {
            lobby_id: Some(LobbyId(parse_num(lobby, "lobby id")?)),
            bytes: 0,
        },
        ("logs", [lobby, bytes]) => Command::Logs {
            lobby_id: Some(LobbyId(parse_num(lobby, "lobby id")?)),
            bytes: parse_num(bytes, "byte count")?,
        },
        ("logs", _) => return Err(bad_args(HELP[4])),
        ("help", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        (other, _) => {
            return Err(ErrorPayload::new(
                "unknown_command",
                format!("unknown command: {other}"),
            )
            .with_hint("Type `help` for the list of commands."));
        }
    };
    Ok(Some(cmd))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    Eof,
}

/// Operator console over the orchestrator.
pub struct Console {
    service: GameInstanceService,
    logs: Arc<ServerLogs>,
}

impl Console {
    pub fn new(service: GameInstanceService, logs: Arc<ServerLogs>) -> Self {
        Self { service, logs }
    }

    pub async fn execute(&self, cmd: Command) -> Result<Value, ErrorPayload> {
        match cmd {
            Command::Start { lobby_id, capacity } => {
                let address = self
                    .service
                    .start_instance(lobby_id, capacity)
                    .await
                    .map_err(|e| ErrorPayload::from(&e))?;
                Ok(json!({ "lobby_id": lobby_id, "address": address }))
            }
            Command::Leave(lobby_id) => {
                let remaining = self
                    .service
                    .player_left(lobby_id)
                    .map_err(|e| ErrorPayload::from(&e))?;
                Ok(json!({ "lobby_id": lobby_id, "remaining": remaining }))
            }
            Command::Status(Some(lobby_id)) => match self.service.instance(lobby_id) {
                Some(snapshot) => Ok(json!(snapshot)),
                None => Err(ErrorPayload::from(&OrchestratorError::UnknownInstance(lobby_id))),
            },
            Command::Status(None) => Ok(json!({
                "state": self.service.state(),
                "in_flight_launches": self.service.in_flight_launches(),
                "instances": self.service.instances(),
            })),
            Command::Reset => Ok(json!({ "terminated": self.service.terminate_all() })),
            Command::Logs {
                lobby_id: None, ..
            } => {
                let lobbies = self.logs.logged_lobbies().map_err(log_io)?;
                Ok(json!({ "dir": self.logs.path(), "lobbies": lobbies }))
            }
            Command::Logs {
                lobby_id: Some(lobby_id),
                bytes,
            } => match self.logs.tail_log(lobby_id, bytes).await.map_err(log_io)? {
                Some(text) => Ok(json!({ "lobby_id": lobby_id, "text": text })),
                None => Err(ErrorPayload::new(
                    "no_logs",
                    format!("no game server log for lobby {lobby_id}"),
                )),
            },
            Command::Help => Ok(json!({ "commands": HELP })),
            Command::Quit => Ok(json!("bye")),
        }
    }

    /// One reply line per non-blank input line.
    pub async fn handle_line(&self, line: &str) -> Option<(String, bool)> {
        let cmd = match parse(line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => return None,
            Err(payload) => return Some((payload.to_json_line(), false)),
        };
        let quit = cmd == Command::Quit;
        let reply = match self.execute(cmd).await {
            Ok(value) => json!({ "ok": value }).to_string(),
            Err(payload) => payload.to_json_line(),
        };
        Some((reply, quit))
    }

    pub async fn run<R, W>(&self, input: R, mut output: W) -> std::io::Result<ConsoleExit>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let Some((reply, quit)) = self.handle_line(&line).await else {
                continue;
            };
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
            if quit {
                return Ok(ConsoleExit::Quit);
            }
        }
        Ok(ConsoleExit::Eof)
    }
}

fn log_io(err: std::io::Error) -> ErrorPayload {
    ErrorPayload::new("log_io", err.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{
        server_logs::LogSink,
        service::tests::{Behavior, MockLauncher, test_config},
        store::MemoryLobbyStore,
    };

    fn console(started: bool) -> Console {
        let service = GameInstanceService::with_launcher(
            &test_config(2000),
            Arc::new(MockLauncher::new(Behavior::Reply(4000))),
            Arc::new(MemoryLobbyStore::default()),
        );
        if started {
            service.start();
        }
        Console::new(service, Arc::new(ServerLogs::temporary().unwrap()))
    }

    fn reply(line: &str) -> Value {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(
            parse("start 12 4").unwrap(),
            Some(Command::Start {
                lobby_id: LobbyId(12),
                capacity: 4
            })
        );
        assert_eq!(parse("LEAVE 3").unwrap(), Some(Command::Leave(LobbyId(3))));
        assert_eq!(parse("status").unwrap(), Some(Command::Status(None)));
        assert_eq!(
            parse("logs 2 100").unwrap(),
            Some(Command::Logs {
                lobby_id: Some(LobbyId(2)),
                bytes: 100
            })
        );
        assert_eq!(parse("exit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(parse("start 1").unwrap_err().code, "bad_arguments");
        assert_eq!(parse("start 1 70000").unwrap_err().code, "bad_arguments");
        assert_eq!(parse("leave x").unwrap_err().code, "bad_arguments");
        let err = parse("launch 1 2").unwrap_err();
        assert_eq!(err.code, "unknown_command");
        assert!(err.hint.is_some());
    }

    #[tokio::test]
    async fn stopped_service_rejects_start() {
        let c = console(false);
        let (line, quit) = c.handle_line("start 1 2").await.unwrap();
        assert!(!quit);
        assert_eq!(reply(&line)["error"]["code"], "service_not_running");
    }

    #[tokio::test]
    async fn unknown_lobby_and_empty_reset() {
        let c = console(true);
        let (line, _) = c.handle_line("leave 9").await.unwrap();
        assert_eq!(reply(&line)["error"]["code"], "unknown_instance");

        let (line, _) = c.handle_line("status 9").await.unwrap();
        assert_eq!(reply(&line)["error"]["code"], "unknown_instance");

        let (line, _) = c.handle_line("reset").await.unwrap();
        assert_eq!(reply(&line)["ok"]["terminated"], 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_status_leave_round() {
        let c = console(true);
        let (line, _) = c.handle_line("start 4 2").await.unwrap();
        let v = reply(&line);
        assert_eq!(v["ok"]["address"]["port"], 4000);
        assert_eq!(v["ok"]["address"]["host"], "games.test");

        let (line, _) = c.handle_line("status").await.unwrap();
        let v = reply(&line);
        assert_eq!(v["ok"]["state"], "Running");
        assert_eq!(v["ok"]["instances"].as_array().unwrap().len(), 1);

        let (line, _) = c.handle_line("leave 4").await.unwrap();
        assert_eq!(reply(&line)["ok"]["remaining"], 1);
        c.service.stop().await;
    }

    #[tokio::test]
    async fn logs_lists_and_tails() {
        let c = console(true);
        let (path, mut file) = c.logs.create_log_file(LobbyId(6)).unwrap();
        writeln!(file, "server ready").unwrap();
        drop(file);
        assert!(path.exists());

        let (line, _) = c.handle_line("logs").await.unwrap();
        assert_eq!(reply(&line)["ok"]["lobbies"], json!([6]));

        let (line, _) = c.handle_line("logs 6").await.unwrap();
        assert_eq!(reply(&line)["ok"]["text"], "server ready\n");

        let (line, _) = c.handle_line("logs 7").await.unwrap();
        assert_eq!(reply(&line)["error"]["code"], "no_logs");
    }

    #[tokio::test]
    async fn run_stops_on_quit() {
        let c = console(true);
        let input: &[u8] = b"help\n\nbogus\nquit\nstatus\n";
        let mut out = Vec::new();

        let exit = c.run(input, &mut out).await.unwrap();

        assert_eq!(exit, ConsoleExit::Quit);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(reply(lines[0])["ok"]["commands"].is_array());
        assert_eq!(reply(lines[1])["error"]["code"], "unknown_command");
        assert_eq!(reply(lines[2])["ok"], "bye");
    }

    #[tokio::test]
    async fn run_reports_eof() {
        let c = console(true);
        let input: &[u8] = b"status\n";
        let exit = c.run(input, tokio::io::sink()).await.unwrap();
        assert_eq!(exit, ConsoleExit::Eof);
    }
}
