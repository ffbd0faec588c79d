//! In-process transport: two endpoints handing messages straight to each
//! other, with no sockets and no buffering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::Result;
use crate::protocol::JsonRpcMessage;
use crate::transport::{CloseHandler, MessageHandler, Transport};

struct Endpoint {
    label: &'static str,
    peer: Mutex<Weak<Endpoint>>,
    handler: Mutex<Option<MessageHandler>>,
    on_close: Mutex<Option<CloseHandler>>,
    closed: AtomicBool,
}

impl Endpoint {
    fn handler(&self) -> Option<MessageHandler> {
        self.handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn receive(&self, message: JsonRpcMessage) {
        if self.closed.load(Ordering::Acquire) {
            debug!(endpoint = self.label, "dropping message for closed endpoint");
            return;
        }
        match self.handler() {
            Some(handler) => handler(message),
            None => debug!(endpoint = self.label, "dropping message, no handler registered"),
        }
    }

    /// The peer closed; fire our close handler once.
    fn peer_closed(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let handler = self.on_close.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handler) = handler {
            debug!(endpoint = self.label, "peer closed");
            handler();
        }
    }
}

/// One endpoint of an in-process message channel.
///
/// An endpoint only holds a weak reference to its peer: dropping or closing
/// one side never keeps the other alive. Messages sent before [`connect`]
/// are dropped, not queued.
///
/// Cloning yields another handle to the same endpoint.
///
/// [`connect`]: InMemoryTransport::connect
#[derive(Clone)]
pub struct InMemoryTransport {
    inner: Arc<Endpoint>,
}

impl InMemoryTransport {
    /// Create an unconnected endpoint. `label` only shows up in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(Endpoint {
                label,
                peer: Mutex::new(Weak::new()),
                handler: Mutex::new(None),
                on_close: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create an unconnected client/server pair.
    pub fn pair() -> (Self, Self) {
        (Self::new("client"), Self::new("server"))
    }

    /// Create a client/server pair already connected in both directions.
    pub fn linked() -> (Self, Self) {
        let (client, server) = Self::pair();
        client.connect(&server);
        server.connect(&client);
        (client, server)
    }

    /// Point this endpoint's sends at `peer`. Connection is one-directional;
    /// the peer must be connected back to reply.
    pub fn connect(&self, peer: &InMemoryTransport) {
        *self.inner.peer.lock().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(&peer.inner);
    }

    /// Whether a live peer is attached.
    pub fn is_connected(&self) -> bool {
        self.inner
            .peer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("label", &self.inner.label)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        if self.is_closed() {
            trace!(endpoint = self.inner.label, "send on closed endpoint ignored");
            return Ok(());
        }

        let peer = self
            .inner
            .peer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade();

        match peer {
            Some(peer) => {
                trace!(
                    from = self.inner.label,
                    to = peer.label,
                    method = message.method().unwrap_or("<response>"),
                    "delivering message"
                );
                peer.receive(message);
            }
            None => debug!(
                endpoint = self.inner.label,
                "dropping message, no peer connected"
            ),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner
            .handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.inner
            .on_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let peer = self
            .inner
            .peer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade();
        if let Some(peer) = peer {
            peer.peer_closed();
        }
        Ok(())
    }

    fn set_handler(&self, handler: MessageHandler) {
        *self.inner.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        *self.inner.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }
}
