//! Transport abstraction shared by in-process and process-backed peers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::JsonRpcMessage;

/// Callback invoked for every message a transport receives.
///
/// Handlers run on the delivering task and must not block; hand work off to
/// a channel when it needs to await.
pub type MessageHandler = Arc<dyn Fn(JsonRpcMessage) + Send + Sync>;

/// Callback invoked once when the peer goes away (process exit, closed
/// pipe, closed in-memory endpoint). Closing our own side does not fire it.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// One side of a bidirectional JSON-RPC message channel.
///
/// The client and server code only ever talk to this trait, so an
/// in-memory endpoint and a child-process pipe are interchangeable.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin delivering inbound messages to the handler.
    async fn start(&self) -> Result<()>;

    /// Send a message to the peer.
    async fn send(&self, message: JsonRpcMessage) -> Result<()>;

    /// Stop the transport. Later sends are no-ops.
    async fn close(&self) -> Result<()>;

    /// Register the inbound message handler, replacing any previous one.
    fn set_handler(&self, handler: MessageHandler);

    /// Register the peer-disconnect callback, replacing any previous one.
    fn set_close_handler(&self, handler: CloseHandler);
}

