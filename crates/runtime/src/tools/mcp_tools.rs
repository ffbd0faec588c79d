//! Tools exposed by an MCP server.

use std::sync::Arc;

use mcp::McpClient;
use serde_json::{Map, Value};

use super::{ToolDeclaration, ToolError};

/// Tool catalog discovered from a connected [`McpClient`].
#[derive(Debug, Clone)]
pub struct McpTools {
    server: String,
    client: Arc<McpClient>,
    declarations: Vec<ToolDeclaration>,
}

impl McpTools {
    /// List the server's tools and translate their input schemas.
    pub async fn discover(client: Arc<McpClient>) -> crate::Result<Self> {
        let server = client
            .server_info()
            .map(|info| info.server_info.name)
            .unwrap_or_else(|| "mcp".to_string());
        let declarations = client
            .list_tools()
            .await?
            .iter()
            .map(ToolDeclaration::from)
            .collect::<Vec<_>>();

        tracing::info!(
            server = %server,
            tools = ?declarations.iter().map(|d| d.name()).collect::<Vec<_>>(),
            "discovered MCP tools"
        );

        Ok(Self {
            server,
            client,
            declarations,
        })
    }

    /// Name of the server the tools came from.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn declarations(&self) -> &[ToolDeclaration] {
        &self.declarations
    }

    /// Call a tool; the text content of the result becomes the output.
    pub async fn call(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let result = self
            .client
            .call_tool(name, Some(Value::Object(args.clone())))
            .await?;
        Ok(Value::String(result.joined_text()))
    }
}
