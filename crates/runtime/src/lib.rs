//! mcpx runtime: tool registry, model abstraction and the chat loop.
//!
//! # Overview
//!
//! - **ToolRegistry**: one name-keyed catalog over local tools, remote HTTP
//!   tools and tools discovered from MCP servers.
//! - **ChatModel**: a trait abstracting model providers (Gemini, or a
//!   scripted model in tests).
//! - **ChatSession**: drives a model through tool calls until it answers,
//!   streaming [`ChatResponseState`] events.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use runtime::{ChatSession, DeviceInfoTool, GeminiModel, LocalTools, ToolRegistry};
//! use runtime::tools::device_info_declaration;
//!
//! # async fn example() {
//! let model = GeminiModel::builder("api-key", "gemini-2.0-flash").build();
//! let registry = ToolRegistry::new()
//!     .with_source(LocalTools::new().with_tool(device_info_declaration(), DeviceInfoTool));
//!
//! let mut session = ChatSession::new(model, Arc::new(registry));
//! let mut events = session.send("What device am I on?");
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! # }
//! ```

mod error;
pub mod model;
pub mod schema;
mod session;
pub mod tools;

pub use error::{Error, Result};

pub use model::{
    ChatModel, GeminiModel, Message, ModelError, ModelRequest, ModelResponse, Part, Role, Usage,
};
pub use schema::{Parameter, ParameterKind, ParsedSchema};
pub use session::{
    ChatResponseState, ChatSession, DEFAULT_MAX_TURNS, DEFAULT_SYSTEM_INSTRUCTION, LoopState,
    NO_TEXT_ERROR, SessionConfig,
};
pub use tools::{
    DeviceInfoTool, FnTool, LocalTools, McpTools, RemoteToolConfig, RemoteTools, SourceKind,
    ToolCallRequest, ToolCallResult, ToolDeclaration, ToolError, ToolHandler, ToolOutcome,
    ToolRegistry, ToolSource,
};
