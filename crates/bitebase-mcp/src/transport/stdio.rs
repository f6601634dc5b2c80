//! Child-process transport.
//!
//! Spawns an MCP server as a child process and exchanges newline-delimited
//! JSON-RPC over its stdin/stdout. Stderr is drained by a background task
//! and logged, so a chatty server can neither block on a full pipe nor
//! corrupt the protocol stream.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::Transport;
use crate::types::{JsonRpcMessage, McpError};

/// Stdio transport to a spawned MCP server process.
#[derive(Debug)]
pub struct StdioTransport {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    command: String,
    connected: bool,
}

impl StdioTransport {
    /// Spawn the server process and wire up its pipes.
    ///
    /// The child is killed when the transport is dropped (`kill_on_drop`),
    /// so a crashed manager cannot leak orphan tool servers.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        let _ = cmd
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            let _ = cmd.env(key, value);
        }
        if let Some(dir) = cwd {
            let _ = cmd.current_dir(dir);
        }

        debug!(command, ?args, "spawning MCP server process");

        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout not captured".to_string()))?;

        // Drain stderr in the background; server diagnostics show up in our
        // logs instead of deadlocking the child on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let server_command = command.to_string();
            drop(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(command = %server_command, line, "mcp server stderr");
                }
            }));
        }

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout).lines(),
            command: command.to_string(),
            connected: true,
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<(), McpError> {
        if !self.connected {
            return Err(McpError::Closed);
        }
        let mut frame = serde_json::to_string(&message)
            .map_err(|e| McpError::Protocol(format!("failed to encode frame: {e}")))?;
        frame.push('\n');

        self.stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("write to child stdin failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("flush to child stdin failed: {e}")))?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<JsonRpcMessage, McpError> {
        if !self.connected {
            return Err(McpError::Closed);
        }
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| McpError::Transport(format!("read from child stdout failed: {e}")))?;

            let Some(line) = line else {
                // EOF: the server exited.
                self.connected = false;
                warn!(command = %self.command, "mcp server closed stdout");
                return Err(McpError::Closed);
            };

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcMessage>(&line) {
                Ok(msg) => return Ok(msg),
                Err(e) => {
                    // Skip garbage lines rather than killing the connection;
                    // some servers print banners before speaking JSON-RPC.
                    warn!(command = %self.command, error = %e, line, "skipping non-JSON-RPC line");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.connected = false;
        if let Err(e) = self.child.kill().await {
            // Already-exited children are fine.
            debug!(command = %self.command, error = %e, "kill on close");
        }
        let _ = self.child.wait().await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
