//! A client connected to an embedded server over an in-memory pair.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::client::McpClient;
use crate::error::Result;
use crate::memory::InMemoryTransport;
use crate::protocol::{CallToolResult, Implementation, Tool};
use crate::server::{McpServer, ServerHandle};

/// Owns both halves of an in-process MCP connection.
pub struct McpSession {
    client: Arc<McpClient>,
    server: Mutex<Option<ServerHandle>>,
    server_info: Implementation,
}

impl McpSession {
    /// Link a transport pair, start `server` on one end and complete the
    /// client handshake on the other.
    pub async fn in_process(server: McpServer) -> Result<Self> {
        let (client_end, server_end) = InMemoryTransport::linked();
        let server_info = server.info().clone();

        let handle = server.serve(Arc::new(server_end));
        let client = Arc::new(McpClient::new(Arc::new(client_end)));
        if let Err(e) = client.connect().await {
            let _ = handle.shutdown().await;
            return Err(e);
        }

        Ok(Self {
            client,
            server: Mutex::new(Some(handle)),
            server_info,
        })
    }

    /// Shared handle to the client half.
    pub fn client(&self) -> Arc<McpClient> {
        Arc::clone(&self.client)
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.client.list_tools().await
    }

    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.client.call_tool(name, arguments).await
    }

    /// Tear down both endpoints. In-flight calls fail with
    /// [`Error::SessionClosed`](crate::Error::SessionClosed).
    pub async fn close(&self) -> Result<()> {
        self.client.close().await?;
        if let Some(handle) = self.server.lock().await.take() {
            handle.shutdown().await?;
        }
        Ok(())
    }
}
