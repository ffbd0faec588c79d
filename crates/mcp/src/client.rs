//! MCP client: request/response correlation on top of any [`Transport`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult,
    RequestId, Tool, methods,
};
use crate::transport::Transport;

/// Why the correlation table stopped accepting requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Closed,
    PeerExited,
}

impl Shutdown {
    fn error(self) -> Error {
        match self {
            Self::Closed => Error::SessionClosed,
            Self::PeerExited => Error::ServerExited,
        }
    }
}

type Waiter = oneshot::Sender<Result<JsonRpcResponse>>;

/// Outstanding requests waiting for a response.
#[derive(Default)]
struct Pending {
    shutdown: Option<Shutdown>,
    waiters: HashMap<RequestId, Waiter>,
}

impl Pending {
    fn resolve(&mut self, response: JsonRpcResponse) {
        match self.waiters.remove(&response.id) {
            Some(tx) => {
                let _ = tx.send(Ok(response));
            }
            None => warn!(id = %response.id, "response for unknown request id"),
        }
    }

    /// Stop accepting requests and fail every waiter. The first reason
    /// sticks. Returns how many waiters were failed.
    fn shut_down(&mut self, reason: Shutdown) -> usize {
        let reason = *self.shutdown.get_or_insert(reason);
        let waiters = std::mem::take(&mut self.waiters);
        let count = waiters.len();
        for tx in waiters.into_values() {
            let _ = tx.send(Err(reason.error()));
        }
        count
    }
}

#[derive(Default)]
struct ClientState {
    initialized: bool,
    server_info: Option<InitializeResult>,
}

/// Client half of an MCP session.
///
/// Requests may be issued concurrently; each one gets its own id and its own
/// slot in the correlation table.
pub struct McpClient {
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicI64,
    state: Mutex<ClientState>,
    timeout: Option<Duration>,
}

impl McpClient {
    /// Wrap a transport. The inbound handler is installed immediately; call
    /// [`connect`](Self::connect) before any tool operation.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let pending = Arc::new(Mutex::new(Pending::default()));

        let table = Arc::clone(&pending);
        transport.set_handler(Arc::new(move |message| match message {
            JsonRpcMessage::Response(response) => {
                table
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .resolve(response);
            }
            JsonRpcMessage::Notification(n) => {
                debug!(method = %n.method, "server notification");
            }
            JsonRpcMessage::Request(r) => {
                debug!(method = %r.method, id = %r.id, "ignoring server-initiated request");
            }
        }));

        let table = Arc::clone(&pending);
        transport.set_close_handler(Arc::new(move || {
            let failed = table
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .shut_down(Shutdown::PeerExited);
            warn!(failed, "MCP server went away");
        }));

        Self {
            transport,
            pending,
            next_id: AtomicI64::new(1),
            state: Mutex::new(ClientState::default()),
            timeout: None,
        }
    }

    /// Fail requests that get no response within `duration`.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Start the transport and perform the initialize handshake.
    pub async fn connect(&self) -> Result<InitializeResult> {
        if let Some(info) = self.server_info() {
            return Ok(info);
        }

        self.transport.start().await?;

        let result: InitializeResult = self
            .request(methods::INITIALIZE, Some(InitializeParams::default()))
            .await?;
        self.transport
            .send(JsonRpcNotification::new(methods::INITIALIZED).into())
            .await?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP session initialized"
        );

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.initialized = true;
        state.server_info = Some(result.clone());
        Ok(result)
    }

    /// Check if the handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .initialized
    }

    /// Get server info (after initialization).
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .server_info
            .clone()
    }

    /// List every tool the server exposes, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = None;
        loop {
            let page: ListToolsResult = self
                .request(methods::TOOLS_LIST, Some(ListToolsParams { cursor }))
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(Error::InvalidResponse(format!(
                        "{}: cursor {next:?} repeated",
                        methods::TOOLS_LIST
                    )));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    /// Call a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.ensure_initialized()?;

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.request(methods::TOOLS_CALL, Some(params)).await?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.joined_text()));
        }
        Ok(result)
    }

    /// Fail all in-flight requests with [`Error::SessionClosed`] and close
    /// the transport. Later calls fail the same way.
    ///
    /// If the server already went away, requests keep failing with
    /// [`Error::ServerExited`].
    pub async fn close(&self) -> Result<()> {
        let abandoned = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .shut_down(Shutdown::Closed);
        if abandoned > 0 {
            debug!(count = abandoned, "abandoning in-flight requests");
        }

        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .initialized = false;
        self.transport.close().await
    }

    // --- Internal methods ---

    fn ensure_initialized(&self) -> Result<()> {
        if let Some(reason) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).shutdown {
            return Err(reason.error());
        }
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn forget(&self, id: &RequestId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .waiters
            .remove(id);
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        // Register before sending so a synchronous transport can't outrun us.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(reason) = pending.shutdown {
                return Err(reason.error());
            }
            pending.waiters.insert(id.clone(), tx);
        }

        debug!(%id, method, "sending request");
        if let Err(e) = self.transport.send(request.into()).await {
            self.forget(&id);
            return Err(e);
        }

        let response = match self.timeout {
            Some(limit) => match timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.forget(&id);
                    return Err(Error::Timeout);
                }
            },
            None => rx.await,
        };
        let response = response.map_err(|_| Error::SessionClosed)??;

        let value = response.into_result()?;
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidResponse(format!("{method}: {e}")))
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("initialized", &self.is_initialized())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTransport;
    use serde_json::json;

    /// Answer every request arriving on `server` with `reply(method, params)`.
    fn answer_with(
        server: &InMemoryTransport,
        reply: impl Fn(&str, Option<&Value>) -> Value + Send + Sync + 'static,
    ) {
        let endpoint = server.clone();
        server.set_handler(Arc::new(move |message| {
            let JsonRpcMessage::Request(request) = message else {
                return;
            };
            let result = reply(&request.method, request.params.as_ref());
            let response = JsonRpcResponse::success(request.id, result);
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                let _ = endpoint.send(response.into()).await;
            });
        }));
    }

    fn initialize_result() -> Value {
        json!({
            "protocolVersion": crate::protocol::PROTOCOL_VERSION,
            "capabilities": {},
            "serverInfo": { "name": "Paged", "version": "0.0.1" }
        })
    }

    fn tool(name: &str) -> Value {
        json!({ "name": name, "inputSchema": { "type": "object" } })
    }

    #[tokio::test]
    async fn list_tools_follows_cursors() {
        let (client, server) = InMemoryTransport::linked();
        answer_with(&server, |method, params| match method {
            methods::INITIALIZE => initialize_result(),
            _ => match params.and_then(|p| p.get("cursor")).and_then(Value::as_str) {
                None => json!({ "tools": [tool("a")], "nextCursor": "page-2" }),
                Some(_) => json!({ "tools": [tool("b")] }),
            },
        });
        let client = McpClient::new(Arc::new(client)).with_timeout(Duration::from_secs(1));
        client.connect().await.unwrap();

        let names: Vec<_> = client
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn repeated_cursor_is_rejected() {
        let (client, server) = InMemoryTransport::linked();
        answer_with(&server, |method, _| match method {
            methods::INITIALIZE => initialize_result(),
            _ => json!({ "tools": [tool("loop")], "nextCursor": "same" }),
        });
        let client = McpClient::new(Arc::new(client)).with_timeout(Duration::from_secs(1));
        client.connect().await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), client.list_tools())
            .await
            .expect("list_tools must terminate");
        assert!(matches!(outcome, Err(Error::InvalidResponse(ref msg)) if msg.contains("same")));
    }

    #[tokio::test]
    async fn peer_going_away_fails_waiters_with_server_exited() {
        let (client_end, server_end) = InMemoryTransport::linked();
        let client = McpClient::new(Arc::new(client_end));

        let (outcome, _) = tokio::join!(
            client.request::<(), Value>(methods::PING, None),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                server_end.close().await
            }
        );

        assert!(matches!(outcome, Err(Error::ServerExited)));
        assert!(client.pending.lock().unwrap().waiters.is_empty());
        assert!(matches!(
            client.call_tool("anything", None).await,
            Err(Error::ServerExited)
        ));
    }

    #[tokio::test]
    async fn tool_calls_before_connect_fail() {
        let (client, _server) = InMemoryTransport::linked();
        let client = McpClient::new(Arc::new(client));

        assert!(matches!(client.list_tools().await, Err(Error::NotInitialized)));
        assert!(matches!(
            client.call_tool("anything", None).await,
            Err(Error::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        // Nobody answers on the server side.
        let (client, _server) = InMemoryTransport::linked();
        let client =
            McpClient::new(Arc::new(client)).with_timeout(Duration::from_millis(20));

        assert!(matches!(client.connect().await, Err(Error::Timeout)));
        assert!(client.pending.lock().unwrap().waiters.is_empty());
    }

    #[tokio::test]
    async fn closed_client_rejects_requests() {
        let (client, _server) = InMemoryTransport::linked();
        let client = McpClient::new(Arc::new(client));
        client.close().await.unwrap();

        assert!(matches!(client.connect().await, Err(Error::SessionClosed)));
        assert!(matches!(client.list_tools().await, Err(Error::SessionClosed)));
    }
}
