//! Tool declarations, sources and the merged registry.

pub mod device;
pub mod errors;
mod handler;
mod local;
mod mcp_tools;
mod registry;
mod remote;
pub mod types;

pub use device::{DEVICE_INFO_TOOL, DeviceInfoTool, device_info_declaration, device_info_server};
pub use errors::ToolError;
pub use handler::{FnTool, ToolHandler};
pub use local::LocalTools;
pub use mcp_tools::McpTools;
pub use registry::{SourceKind, ToolRegistry, ToolSource};
pub use remote::{RemoteToolConfig, RemoteTools};
pub use types::{ToolCallRequest, ToolCallResult, ToolDeclaration, ToolOutcome};
