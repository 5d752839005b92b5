//! Transport Channel: the live bidirectional frame pipe.
//!
//! A channel only moves frames. It decodes inbound text frames, hands each one
//! to the registered handlers on its single receive loop, and encodes outbound
//! frames. It holds no message state of its own.

use async_trait::async_trait;
use std::sync::Arc;
use sync_protocol::{ClientFrame, ServerFrame};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SyncResult;

pub mod memory;
pub mod ws;

pub use memory::MemoryChannel;
pub use ws::WsChannel;

/// Receives decoded inbound frames.
///
/// Invoked once per frame, in arrival order; the next frame is not read until
/// `handle` returns.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn handle(&self, frame: ServerFrame);
}

/// Outbound half of a channel
#[async_trait]
pub trait FrameSender: Send + Sync {
    /// Encode and transmit one frame.
    ///
    /// Fails with `NotConnected` when the channel is down and with `Send` on
    /// transport failure. Never retried here.
    async fn send(&self, frame: ClientFrame) -> SyncResult<()>;
}

#[async_trait]
pub trait TransportChannel: FrameSender {
    /// Open the connection and register `identity` with the server.
    ///
    /// Returns once the handshake and the `register` frame have gone through.
    /// Calling it while connected is a no-op.
    async fn connect(&self, identity: Uuid) -> SyncResult<()>;

    /// Close the connection. No reconnect is attempted afterwards.
    async fn disconnect(&self) -> SyncResult<()>;

    async fn on_event(&self, handler: Arc<dyn FrameHandler>);

    fn is_connected(&self) -> bool;

    /// Shareable handle to the outbound half, for components that must send
    /// frames without owning the channel.
    fn outbound(&self) -> Arc<dyn FrameSender>;
}

/// Ordered set of inbound frame handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<Vec<Arc<dyn FrameHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handler: Arc<dyn FrameHandler>) {
        let mut guard = self.handlers.write().await;
        guard.push(handler);
        tracing::debug!(handlers = guard.len(), "frame handler registered");
    }

    /// Run every handler for `frame`, one after another.
    pub async fn dispatch(&self, frame: ServerFrame) {
        let handlers = self.handlers.read().await.clone();
        if handlers.is_empty() {
            tracing::debug!(kind = frame.kind(), "no handler registered, frame dropped");
            return;
        }
        for handler in handlers {
            handler.handle(frame.clone()).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Decode a text frame and dispatch it.
///
/// Malformed frames are logged and dropped; unknown frame types are ignored.
pub(crate) async fn dispatch_text(handlers: &HandlerRegistry, text: &str) {
    match ServerFrame::decode(text) {
        Ok(Some(frame)) => handlers.dispatch(frame).await,
        Ok(None) => tracing::debug!("ignoring frame of unhandled type"),
        Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
    }
}
