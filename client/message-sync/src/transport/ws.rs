//! WebSocket implementation of the live channel.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_protocol::ClientFrame;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::{dispatch_text, FrameHandler, FrameSender, HandlerRegistry, TransportChannel};
use crate::error::{SyncError, SyncResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a stopping receive loop may take to finish its current frame.
const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound half: owns the socket sink
pub struct WsWriter {
    sink: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    connected: AtomicBool,
}

impl WsWriter {
    fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FrameSender for WsWriter {
    async fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }

        let text = frame.encode()?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(SyncError::NotConnected)?;

        sink.send(WsMessage::text(text)).await.map_err(|e| {
            tracing::warn!(kind = frame.kind(), error = %e, "live channel send failed");
            SyncError::Send(e.to_string())
        })
    }
}

/// Running receive loop and its stop signal
struct Reader {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Reader {
    fn spawn(
        stream: SplitStream<WsStream>,
        handlers: HandlerRegistry,
        writer: Arc<WsWriter>,
    ) -> Self {
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(receive_loop(stream, handlers, writer, stopped));
        Self { stop, task }
    }

    /// Ask the loop to exit at the next frame boundary and wait for it.
    ///
    /// A frame already being handled runs to completion; the task is only
    /// aborted if it overruns [`READER_SHUTDOWN_TIMEOUT`].
    async fn shutdown(self) {
        let Self { stop, mut task } = self;
        let _ = stop.send(());

        match tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "receive loop ended abnormally"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = READER_SHUTDOWN_TIMEOUT.as_secs(),
                    "receive loop did not stop in time, aborting"
                );
                task.abort();
            }
        }
    }
}

pub struct WsChannel {
    url: String,
    writer: Arc<WsWriter>,
    handlers: HandlerRegistry,
    reader: Mutex<Option<Reader>>,
}

impl WsChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            writer: Arc::new(WsWriter::new()),
            handlers: HandlerRegistry::new(),
            reader: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FrameSender for WsChannel {
    async fn send(&self, frame: ClientFrame) -> SyncResult<()> {
        self.writer.send(frame).await
    }
}

#[async_trait]
impl TransportChannel for WsChannel {
    async fn connect(&self, identity: Uuid) -> SyncResult<()> {
        // Held for the whole handshake so concurrent connects serialize.
        let mut reader = self.reader.lock().await;
        if self.is_connected() {
            tracing::debug!(user_id = %identity, "live channel already connected");
            return Ok(());
        }
        if let Some(stale) = reader.take() {
            stale.shutdown().await;
        }

        let (stream, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            tracing::error!(url = %self.url, error = %e, "live channel connect failed");
            SyncError::Connect(e.to_string())
        })?;
        let (sink, stream) = stream.split();

        *self.writer.sink.lock().await = Some(sink);
        self.writer.connected.store(true, Ordering::SeqCst);
        *reader = Some(Reader::spawn(
            stream,
            self.handlers.clone(),
            self.writer.clone(),
        ));

        tracing::info!(url = %self.url, user_id = %identity, "live channel connected");

        if let Err(e) = self.writer.send(ClientFrame::Register { user_id: identity }).await {
            self.writer.connected.store(false, Ordering::SeqCst);
            self.writer.sink.lock().await.take();
            if let Some(failed) = reader.take() {
                failed.shutdown().await;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&self) -> SyncResult<()> {
        let mut reader = self.reader.lock().await;
        self.writer.connected.store(false, Ordering::SeqCst);

        if let Some(mut sink) = self.writer.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "close handshake failed");
            }
        }
        if let Some(running) = reader.take() {
            running.shutdown().await;
        }

        tracing::info!(url = %self.url, "live channel disconnected");
        Ok(())
    }

    async fn on_event(&self, handler: Arc<dyn FrameHandler>) {
        self.handlers.register(handler).await;
    }

    fn is_connected(&self) -> bool {
        self.writer.connected.load(Ordering::SeqCst)
    }

    fn outbound(&self) -> Arc<dyn FrameSender> {
        self.writer.clone()
    }
}

/// Reads frames until the socket closes or fails, or `stop` fires.
///
/// Each decoded frame is fully handled before the next read. `stop` is only
/// observed while waiting for a frame, never during handling.
async fn receive_loop(
    mut stream: SplitStream<WsStream>,
    handlers: HandlerRegistry,
    writer: Arc<WsWriter>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let next = tokio::select! {
            _ = &mut stop => {
                tracing::debug!("receive loop asked to stop");
                break;
            }
            next = stream.next() => next,
        };
        let Some(next) = next else {
            break;
        };

        match next {
            Ok(WsMessage::Text(text)) => dispatch_text(&handlers, text.as_str()).await,
            Ok(WsMessage::Binary(data)) => {
                tracing::warn!(len = data.len(), "dropping binary frame");
            }
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(?frame, "server closed live channel");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "live channel receive failed");
                break;
            }
        }
    }

    writer.connected.store(false, Ordering::SeqCst);
    tracing::debug!("live channel receive loop finished");
}
