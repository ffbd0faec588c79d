//! Embedded MCP server answering from an in-process tool table.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION,
    ServerCapabilities, Tool, ToolsCapability, methods,
};
use crate::transport::Transport;

type ToolFn = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, CallToolResult> + Send + Sync>;

struct RegisteredTool {
    tool: Tool,
    handler: ToolFn,
}

/// An MCP server whose tools are plain async closures.
pub struct McpServer {
    info: Implementation,
    capabilities: ServerCapabilities,
    tools: Vec<RegisteredTool>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation::new(name, version),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
                ..Default::default()
            },
            tools: Vec::new(),
        }
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn add_tool<F, Fut>(&mut self, tool: Tool, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallToolResult> + Send + 'static,
    {
        let handler: ToolFn = Arc::new(move |args| Box::pin(handler(args)));
        let entry = RegisteredTool { tool, handler };
        match self.tools.iter_mut().find(|t| t.tool.name == entry.tool.name) {
            Some(existing) => *existing = entry,
            None => self.tools.push(entry),
        }
    }

    pub fn with_tool<F, Fut>(mut self, tool: Tool, handler: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallToolResult> + Send + 'static,
    {
        self.add_tool(tool, handler);
        self
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter().map(|t| &t.tool)
    }

    /// Attach to `transport` and answer requests until the handle is shut
    /// down.
    ///
    /// Messages are read in arrival order by one task. `tools/call` handlers
    /// run concurrently and answer as they finish, so a slow tool never
    /// holds up `ping` or other calls.
    pub fn serve(self, transport: Arc<dyn Transport>) -> ServerHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcMessage>();
        transport.set_handler(Arc::new(move |message| {
            let _ = tx.send(message);
        }));

        let name = self.info.name.clone();
        let responder = Arc::clone(&transport);
        let task = tokio::spawn(async move {
            let mut state = ServerState {
                server: self,
                initialized: false,
            };
            // Dropped with this task on shutdown, aborting running calls.
            let mut calls = JoinSet::new();
            loop {
                tokio::select! {
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        match state.handle(message) {
                            Reply::Now(response) => respond(&responder, &state.server.info.name, response).await,
                            Reply::Later(pending) => {
                                let responder = Arc::clone(&responder);
                                let name = state.server.info.name.clone();
                                calls.spawn(async move {
                                    let response = pending.await;
                                    respond(&responder, &name, response).await;
                                });
                            }
                            Reply::None => {}
                        }
                    }
                    Some(_) = calls.join_next(), if !calls.is_empty() => {}
                }
            }
        });

        info!(server = %name, "MCP server listening");
        ServerHandle { transport, task }
    }
}

async fn respond(transport: &Arc<dyn Transport>, server: &str, response: JsonRpcResponse) {
    if let Err(e) = transport.send(response.into()).await {
        warn!(server, error = %e, "failed to send response");
    }
}

/// What the server owes the sender of a message.
enum Reply {
    Now(JsonRpcResponse),
    Later(BoxFuture<'static, JsonRpcResponse>),
    None,
}

struct ServerState {
    server: McpServer,
    initialized: bool,
}

impl ServerState {
    fn handle(&mut self, message: JsonRpcMessage) -> Reply {
        match message {
            JsonRpcMessage::Request(request) => self.handle_request(request),
            JsonRpcMessage::Notification(n) => {
                if n.method == methods::INITIALIZED {
                    debug!(server = %self.server.info.name, "client initialized");
                } else {
                    debug!(server = %self.server.info.name, method = %n.method, "ignoring notification");
                }
                Reply::None
            }
            JsonRpcMessage::Response(r) => {
                debug!(server = %self.server.info.name, id = %r.id, "ignoring response");
                Reply::None
            }
        }
    }

    fn handle_request(&mut self, request: JsonRpcRequest) -> Reply {
        let id = request.id.clone();
        debug!(server = %self.server.info.name, %id, method = %request.method, "handling request");

        let outcome = match request.method.as_str() {
            methods::INITIALIZE => {
                self.initialized = true;
                to_value(InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: self.server.capabilities.clone(),
                    server_info: self.server.info.clone(),
                })
            }
            methods::PING => Ok(serde_json::json!({})),
            methods::TOOLS_LIST | methods::TOOLS_CALL if !self.initialized => Err(
                JsonRpcError::new(JsonRpcError::SERVER_NOT_INITIALIZED, "server not initialized"),
            ),
            methods::TOOLS_LIST => to_value(ListToolsResult {
                tools: self.server.tools().cloned().collect(),
                next_cursor: None,
            }),
            methods::TOOLS_CALL => match self.start_call(request.params) {
                Ok(call) => {
                    return Reply::Later(Box::pin(async move {
                        match to_value(call.await) {
                            Ok(result) => JsonRpcResponse::success(id, result),
                            Err(error) => JsonRpcResponse::failure(id, error),
                        }
                    }));
                }
                Err(error) => Err(error),
            },
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Reply::Now(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    /// Validate a `tools/call` and return the handler's pending result.
    fn start_call(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<BoxFuture<'static, CallToolResult>, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("missing params"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
            })?;

        let handler = self
            .server
            .tools
            .iter()
            .find(|t| t.tool.name == params.name)
            .map(|t| Arc::clone(&t.handler))
            .ok_or_else(|| JsonRpcError::invalid_params(format!("unknown tool: {}", params.name)))?;

        Ok(handler(params.arguments))
    }
}

fn to_value<T: serde::Serialize>(value: T) -> std::result::Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
}

/// Running server; dropping it leaves the server task running.
pub struct ServerHandle {
    transport: Arc<dyn Transport>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Close the server's transport and stop its task.
    pub async fn shutdown(self) -> Result<()> {
        self.task.abort();
        self.transport.close().await
    }
}

