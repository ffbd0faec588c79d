//! The `get_device_info` tool: basic facts about the host machine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mcp::{CallToolResult, McpServer, Tool};
use serde_json::{Map, Value};
use sysinfo::System;

use super::{ToolDeclaration, ToolError, ToolHandler};

pub const DEVICE_INFO_TOOL: &str = "get_device_info";
pub const DEVICE_INFO_DESCRIPTION: &str = "Get basic information about the current device";

/// Name and version the embedded device-info MCP server reports.
pub const DEVICE_INFO_SERVER: (&str, &str) = ("DeviceInfoMCP", "1.0.0");

/// Collect host facts. Fields the platform can't report are left out.
pub fn device_info() -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            info.insert(key.to_string(), value);
        }
    };

    put("os_name", System::name());
    put("os_version", System::os_version());
    put("os_long_version", System::long_os_version());
    put("kernel_version", System::kernel_version());
    put("host_name", System::host_name());
    put("os_family", Some(std::env::consts::FAMILY.to_string()));
    put("arch", Some(std::env::consts::ARCH.to_string()));
    put(
        "cpu_count",
        std::thread::available_parallelism()
            .ok()
            .map(|n| n.to_string()),
    );
    put(
        "boot_time",
        chrono::DateTime::from_timestamp(System::boot_time() as i64, 0).map(|t| t.to_rfc3339()),
    );

    info
}

pub fn device_info_declaration() -> ToolDeclaration {
    ToolDeclaration::new(DEVICE_INFO_TOOL, DEVICE_INFO_DESCRIPTION)
}

/// Local handler for [`DEVICE_INFO_TOOL`]. Ignores its arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceInfoTool;

#[async_trait]
impl ToolHandler for DeviceInfoTool {
    async fn call(&self, _args: &Map<String, Value>) -> Result<Value, ToolError> {
        let info = tokio::task::spawn_blocking(device_info)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        serde_json::to_value(info).map_err(|e| ToolError::Execution(e.to_string()))
    }
}

/// An MCP server exposing [`DEVICE_INFO_TOOL`].
pub fn device_info_server() -> McpServer {
    let (name, version) = DEVICE_INFO_SERVER;
    McpServer::new(name, version).with_tool(
        Tool::new(DEVICE_INFO_TOOL, DEVICE_INFO_DESCRIPTION),
        |_args| async {
            match DeviceInfoTool.call(&Map::new()).await {
                Ok(info) => CallToolResult::text(info.to_string()),
                Err(e) => CallToolResult::error(e.to_string()),
            }
        },
    )
}
