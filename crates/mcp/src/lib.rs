//! MCP (Model Context Protocol) client, embedded server and transports.
//!
//! The client and server only see the [`Transport`] trait, so the same code
//! runs over an in-process endpoint pair or a spawned server's stdio.
//!
//! # Example
//!
//! ```no_run
//! use mcp::{CallToolResult, McpServer, McpSession, Tool};
//!
//! # async fn example() -> mcp::Result<()> {
//! let server = McpServer::new("echo", "1.0.0").with_tool(
//!     Tool::new("echo", "Echo the arguments back"),
//!     |args| async move { CallToolResult::text(args.unwrap_or_default().to_string()) },
//! );
//!
//! let session = McpSession::in_process(server).await?;
//! for tool in session.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = session
//!     .call_tool("echo", Some(serde_json::json!({ "hello": "world" })))
//!     .await?;
//! println!("{}", result.joined_text());
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod memory;
mod protocol;
mod server;
mod session;
mod stdio;
mod transport;

pub use client::McpClient;
pub use error::{Error, Result};
pub use memory::InMemoryTransport;
pub use protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, PROTOCOL_VERSION, RequestId, ServerCapabilities, Tool, ToolContent,
    ToolsCapability, methods,
};
pub use server::{McpServer, ServerHandle};
pub use session::McpSession;
pub use stdio::{DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, ServerConfig, StdioTransport};
pub use transport::{CloseHandler, MessageHandler, Transport};
