//! Per-user sync session.
//!
//! Owns one store, one live channel, and the dispatcher, reconciler and
//! projector wired between them. Presentation code holds a `SyncSession`
//! instead of reaching for process-wide managers.

use std::sync::Arc;
use sync_protocol::{ClientFrame, Message, MessageStatus};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::events::{ChangeFeed, StoreEvent, SubscriberId};
use crate::models::Conversation;
use crate::services::{
    ConversationProjector, HttpMessageApi, InboundReconciler, MessageApi, OutboundDispatcher,
    ProjectorWatch, ReconcileScope,
};
use crate::store::{
    JsonFileObjectStore, MemoryObjectStore, MessageQuery, MessageStore, ObjectStore, StatusMerge,
};
use crate::transport::{FrameSender, TransportChannel, WsChannel};

pub struct SyncSession {
    user_id: Uuid,
    store: Arc<MessageStore>,
    channel: Arc<dyn TransportChannel>,
    dispatcher: OutboundDispatcher,
    projector: ConversationProjector,
    _watch: ProjectorWatch,
}

impl SyncSession {
    /// Build a session against the configured backend.
    ///
    /// Messages persist under `store_dir` when set, otherwise in memory.
    pub async fn from_config(config: &Config, user_id: Uuid) -> SyncResult<Self> {
        config.validate()?;

        let backend: Arc<dyn ObjectStore> = match &config.store_dir {
            Some(dir) => Arc::new(JsonFileObjectStore::open(dir).await?),
            None => Arc::new(MemoryObjectStore::new()),
        };
        let store = Arc::new(MessageStore::open(backend, ChangeFeed::new()).await?);
        let api = Arc::new(HttpMessageApi::new(&config.api_base_url));
        let channel = Arc::new(WsChannel::new(config.ws_url.clone()));

        Ok(Self::new(user_id, store, channel, api).await)
    }

    /// Wire a session from explicit collaborators.
    pub async fn new(
        user_id: Uuid,
        store: Arc<MessageStore>,
        channel: Arc<dyn TransportChannel>,
        api: Arc<dyn MessageApi>,
    ) -> Self {
        let reconciler = Arc::new(InboundReconciler::new(
            user_id,
            ReconcileScope::Session,
            store.clone(),
            channel.outbound(),
        ));
        channel.on_event(reconciler).await;

        let projector = ConversationProjector::new(user_id, store.clone());
        let watch = projector.watch(store.changes()).await;
        let dispatcher = OutboundDispatcher::new(store.clone(), api);

        tracing::info!(user_id = %user_id, "sync session created");

        Self {
            user_id,
            store,
            channel,
            dispatcher,
            projector,
            _watch: watch,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn projector(&self) -> &ConversationProjector {
        &self.projector
    }

    pub async fn connect(&self) -> SyncResult<()> {
        self.channel.connect(self.user_id).await
    }

    pub async fn disconnect(&self) -> SyncResult<()> {
        self.channel.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub async fn send_message(
        &self,
        recipient_id: Uuid,
        content: impl Into<String>,
    ) -> SyncResult<Message> {
        self.dispatcher
            .send(self.user_id, Some(recipient_id), content, false)
            .await
    }

    pub async fn post_to_feed(&self, content: impl Into<String>) -> SyncResult<Message> {
        self.dispatcher.send(self.user_id, None, content, true).await
    }

    /// Status change through the REST endpoint.
    pub async fn update_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> SyncResult<StatusMerge> {
        self.dispatcher.update_status(message_id, status).await
    }

    /// Mark everything `peer_id` sent us as read.
    ///
    /// Each unread message gets an `updateStatus(read)` frame on the live
    /// channel followed by a local merge. Returns how many messages moved to
    /// `Read`. Stops at the first failed send; messages already handled stay
    /// read.
    pub async fn mark_conversation_read(&self, peer_id: Uuid) -> SyncResult<usize> {
        if !self.channel.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let thread = self.store.conversation(self.user_id, peer_id).await;
        let mut marked = 0;

        for message in thread
            .iter()
            .filter(|m| m.sender_id == peer_id && m.status < MessageStatus::Read)
        {
            self.channel
                .send(ClientFrame::UpdateStatus {
                    message_id: message.id,
                    status: MessageStatus::Read,
                })
                .await?;

            if self
                .store
                .update_status(message.id, MessageStatus::Read)
                .await?
                .was_applied()
            {
                marked += 1;
            }
        }

        if marked > 0 {
            tracing::info!(peer_id = %peer_id, marked, "conversation marked read");
        }
        Ok(marked)
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.projector.conversations().await
    }

    /// Thread with `peer_id`, oldest first.
    pub async fn conversation(&self, peer_id: Uuid) -> MessageQuery {
        self.store.conversation(self.user_id, peer_id).await
    }

    /// Feed posts, newest first.
    pub async fn feed(&self) -> MessageQuery {
        self.store.feed_posts().await
    }

    pub async fn subscribe(&self) -> (SubscriberId, UnboundedReceiver<StoreEvent>) {
        self.store.changes().subscribe().await
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.store.changes().unsubscribe(id).await;
    }
}
