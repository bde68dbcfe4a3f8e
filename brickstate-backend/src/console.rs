//! Game server console over the stdio of a child process.

use crate::error::ConsoleError;
use crate::host::{ChunkOptions, Consumer, Host, Row, RowGroup, capture_row};
use crate::log_line::LogLine;
use crate::snapshot::{PLAYER_NAME_COMMAND, PLAYER_NAME_ROW};
use brickstate_db::Player;
use regex::Regex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, broadcast};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

const LINE_BUFFER: usize = 4096;

/// Spawned server process. Output lines are broadcast to every watcher.
pub struct ProcessConsole {
    stdin: Mutex<ChildStdin>,
    lines: broadcast::Sender<Arc<str>>,
    _child: Child,
}

impl ProcessConsole {
    /// Spawn `command` (program and whitespace separated arguments).
    pub fn spawn(command: &str) -> Result<Self, ConsoleError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(ConsoleError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(ConsoleError::Spawn)?;

        let stdin = child.stdin.take().ok_or(ConsoleError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ConsoleError::MissingPipe("stdout"))?;
        let (lines, _) = broadcast::channel(LINE_BUFFER);

        let sender = lines.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        // No receivers is fine, nobody is watching right now.
                        let _ = sender.send(Arc::from(line));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "failed to read server output");
                        break;
                    }
                }
            }
            info!("server output closed");
        });

        info!(program, "server process spawned");
        Ok(Self {
            stdin: Mutex::new(stdin),
            lines,
            _child: child,
        })
    }

    /// Receive every output line from now on.
    pub fn subscribe_lines(&self) -> broadcast::Receiver<Arc<str>> {
        self.lines.subscribe()
    }

    /// Write one console command.
    pub async fn send(&self, command: &str) -> Result<(), ConsoleError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Run `command` and collect its matching output rows.
    pub async fn watch_chunk(&self, command: &str, pattern: &Regex, options: &ChunkOptions) -> Vec<Row> {
        let groups = self.watch(command, pattern, None, options).await;
        groups.into_iter().map(|group| group.item).collect()
    }

    /// Run `command` and collect header rows with their member rows.
    pub async fn watch_array(
        &self,
        command: &str,
        header: &Regex,
        member: &Regex,
        options: &ChunkOptions,
    ) -> Vec<RowGroup> {
        self.watch(command, header, Some(member), options).await
    }

    async fn watch(
        &self,
        command: &str,
        header: &Regex,
        member: Option<&Regex>,
        options: &ChunkOptions,
    ) -> Vec<RowGroup> {
        let mut output = self.subscribe_lines();
        if let Err(e) = self.send(command).await {
            warn!(command, error = %e, "console command failed");
            return Vec::new();
        }

        let deadline = Instant::now() + options.timeout;
        let mut groups: Vec<RowGroup> = Vec::new();
        let mut started = options.first_key.is_none();
        let mut last_match: Option<Instant> = None;

        loop {
            let wait_until = match last_match {
                Some(at) => deadline.min(at + options.after_match_delay),
                None => deadline,
            };
            let raw = match timeout_at(wait_until, output.recv()).await {
                Err(_) => break,
                Ok(Ok(raw)) => raw,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(command, skipped, "console output lagged");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
            };
            let line = LogLine::parse(&raw);

            if let Some(caps) = header.captures(&line.data) {
                let row = capture_row(header, &caps);
                if !started {
                    let first = options.first_key.as_deref().and_then(|key| row.get(key));
                    if first.map(String::as_str) != Some("0") {
                        continue;
                    }
                    started = true;
                }
                groups.push(RowGroup {
                    item: row,
                    members: Vec::new(),
                });
                last_match = Some(Instant::now());
            } else if let Some(member) = member {
                let Some(caps) = member.captures(&line.data) else {
                    continue;
                };
                if let Some(group) = groups.last_mut() {
                    group.members.push(capture_row(member, &caps));
                    last_match = Some(Instant::now());
                }
            }
        }

        debug!(command, rows = groups.len(), "console query finished");
        groups
    }
}

/// [`Host`] backed by a [`ProcessConsole`] and a fixed set of consumers.
pub struct ConsoleHost {
    console: Arc<ProcessConsole>,
    consumers: HashMap<String, Arc<dyn Consumer>>,
    lookup_options: ChunkOptions,
}

impl ConsoleHost {
    pub fn new(
        console: Arc<ProcessConsole>,
        consumers: Vec<Arc<dyn Consumer>>,
        lookup_options: ChunkOptions,
    ) -> Self {
        Self {
            console,
            consumers: consumers
                .into_iter()
                .map(|c| (c.name().to_string(), c))
                .collect(),
            lookup_options,
        }
    }
}

impl Host for ConsoleHost {
    async fn watch_chunk(&self, command: &str, pattern: &Regex, options: &ChunkOptions) -> Vec<Row> {
        self.console.watch_chunk(command, pattern, options).await
    }

    async fn watch_array(
        &self,
        command: &str,
        header: &Regex,
        member: &Regex,
        options: &ChunkOptions,
    ) -> Vec<RowGroup> {
        self.console.watch_array(command, header, member, options).await
    }

    async fn lookup_player(&self, name_or_state: &str) -> Option<Player> {
        let rows = self
            .console
            .watch_chunk(PLAYER_NAME_COMMAND, &PLAYER_NAME_ROW, &self.lookup_options)
            .await;
        rows.into_iter()
            .find(|row| {
                row.get("name").map(String::as_str) == Some(name_or_state)
                    || row.get("state").map(String::as_str) == Some(name_or_state)
            })
            .and_then(|mut row| {
                Some(Player {
                    name: row.remove("name")?,
                    id: None,
                    state: row.remove("state")?,
                })
            })
    }

    async fn lookup_consumer(&self, name: &str) -> Option<Arc<dyn Consumer>> {
        self.consumers.get(name).cloned()
    }
}
