//! In-process channel for embedding tests.
//!
//! Outbound frames are recorded instead of transmitted; inbound frames are
//! injected with [`MemoryChannel::deliver`] and go through the same
//! serialized handler path as the WebSocket channel.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sync_protocol::{ClientFrame, ServerFrame};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{dispatch_text, FrameHandler, FrameSender, HandlerRegistry, TransportChannel};
use crate::error::{SyncError, SyncResult};

#[derive(Default)]
pub struct MemoryOutbound {
    sent: Mutex<Vec<ClientFrame>>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
}

#[async_trait]
impl FrameSender for MemoryOutbound {
    async fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SyncError::Send("simulated transport failure".to_string()));
        }
        self.sent.lock().await.push(frame);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryChannel {
    outbound: Arc<MemoryOutbound>,
    handlers: HandlerRegistry,
    identity: Mutex<Option<Uuid>>,
    // One inbound frame at a time, like a socket read loop.
    inbound: Mutex<()>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn identity(&self) -> Option<Uuid> {
        *self.identity.lock().await
    }

    pub async fn sent_frames(&self) -> Vec<ClientFrame> {
        self.outbound.sent.lock().await.clone()
    }

    pub async fn take_sent(&self) -> Vec<ClientFrame> {
        std::mem::take(&mut *self.outbound.sent.lock().await)
    }

    /// Make every following send fail with `Send`.
    pub fn fail_sends(&self, fail: bool) {
        self.outbound.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Hand an inbound frame to the handlers as if it arrived on the wire.
    pub async fn deliver(&self, frame: ServerFrame) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let _turn = self.inbound.lock().await;
        self.handlers.dispatch(frame).await;
        Ok(())
    }

    /// Like [`deliver`](Self::deliver) but starting from raw frame text.
    pub async fn deliver_text(&self, text: &str) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let _turn = self.inbound.lock().await;
        dispatch_text(&self.handlers, text).await;
        Ok(())
    }
}

#[async_trait]
impl FrameSender for MemoryChannel {
    async fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        self.outbound.send(frame).await
    }
}

#[async_trait]
impl TransportChannel for MemoryChannel {
    async fn connect(&self, identity: Uuid) -> SyncResult<()> {
        let mut current = self.identity.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.outbound.connected.store(true, Ordering::SeqCst);
        *current = Some(identity);
        self.outbound
            .send(ClientFrame::Register { user_id: identity })
            .await
    }

    async fn disconnect(&self) -> SyncResult<()> {
        self.outbound.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn on_event(&self, handler: Arc<dyn FrameHandler>) {
        self.handlers.register(handler).await;
    }

    fn is_connected(&self) -> bool {
        self.outbound.connected.load(Ordering::SeqCst)
    }

    fn outbound(&self) -> Arc<dyn FrameSender> {
        self.outbound.clone()
    }
}
