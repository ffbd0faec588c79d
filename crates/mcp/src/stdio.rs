//! Process-backed transport: newline-delimited JSON-RPC over a child's
//! stdin/stdout.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::JsonRpcMessage;
use crate::transport::{CloseHandler, MessageHandler, Transport};

/// Default timeout for requests to a process-backed server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum size of a single inbound line (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// How to launch an MCP server process.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Transport talking to a spawned MCP server process.
pub struct StdioTransport {
    config: ServerConfig,
    process: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: StdMutex<Option<ChildStdout>>,
    handler: StdMutex<Option<MessageHandler>>,
    on_close: StdMutex<Option<CloseHandler>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the server process. Nothing is read until [`Transport::start`].
    pub fn spawn(config: ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn()?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Io(std::io::Error::other("failed to capture stdout")))?;

        info!(server = %config.name, command = %config.command, "spawned MCP server");

        Ok(Self {
            config,
            process: Mutex::new(process),
            stdin: Mutex::new(stdin),
            stdout: StdMutex::new(Some(stdout)),
            handler: StdMutex::new(None),
            on_close: StdMutex::new(None),
            reader: StdMutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

/// Feed inbound lines to `handler` until the server's stdout closes, then
/// report the disconnect through `on_close`. Aborted by [`Transport::close`].
async fn read_loop(
    name: String,
    stdout: ChildStdout,
    handler: Option<MessageHandler>,
    on_close: Option<CloseHandler>,
) {
    let mut stdout = BufReader::new(stdout);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = match stdout.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                warn!(server = %name, error = %e, "failed to read from MCP server");
                break;
            }
        };
        if bytes_read == 0 {
            info!(server = %name, "MCP server closed its output");
            break;
        }

        if line.len() > MAX_OUTPUT_SIZE {
            let err = Error::OutputTooLarge {
                size: line.len(),
                max: MAX_OUTPUT_SIZE,
            };
            warn!(server = %name, error = %err, "discarding message");
            continue;
        }

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        trace!(server = %name, payload = text, "received line");

        match serde_json::from_str::<JsonRpcMessage>(text) {
            Ok(message) => match &handler {
                Some(handler) => handler(message),
                None => debug!(server = %name, "dropping message, no handler registered"),
            },
            Err(e) => warn!(server = %name, error = %e, "ignoring malformed message"),
        }
    }

    if let Some(on_close) = on_close {
        on_close();
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<()> {
        let stdout = self
            .stdout
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(stdout) = stdout else {
            // Already started.
            return Ok(());
        };

        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let on_close = self
            .on_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let task = tokio::spawn(read_loop(self.config.name.clone(), stdout, handler, on_close));
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }

        let json = serde_json::to_string(&message)?;
        if json.len() > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size: json.len(),
                max: MAX_OUTPUT_SIZE,
            });
        }
        trace!(server = %self.config.name, payload = %json, "sending line");

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(task) = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }

        let mut process = self.process.lock().await;
        let _ = process.kill().await;
        info!(server = %self.config.name, "MCP server stopped");
        Ok(())
    }

    fn set_handler(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        *self.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }
}
