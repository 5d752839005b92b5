//! Store change notifications.
//!
//! Presentation code subscribes here instead of observing model objects.
//! Every committed store mutation is published once, in commit order, to each
//! live subscriber.

use std::sync::Arc;
use sync_protocol::{Message, MessageStatus};
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

/// A committed change to the message store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Inserted(Message),
    StatusChanged {
        message_id: Uuid,
        status: MessageStatus,
        sender_id: Uuid,
        recipient_id: Option<Uuid>,
    },
    IdReplaced {
        old_id: Uuid,
        message: Message,
    },
}

impl StoreEvent {
    /// Whether the change concerns a message `user_id` sent or received.
    pub fn involves(&self, user_id: Uuid) -> bool {
        match self {
            StoreEvent::Inserted(message) | StoreEvent::IdReplaced { message, .. } => {
                message.involves(user_id)
            }
            StoreEvent::StatusChanged {
                sender_id,
                recipient_id,
                ..
            } => *sender_id == user_id || *recipient_id == Some(user_id),
        }
    }
}

/// Unique identifier for a change-feed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<StoreEvent>,
}

/// Fan-out of store events to any number of subscribers
#[derive(Default, Clone)]
pub struct ChangeFeed {
    inner: Arc<RwLock<Vec<Subscriber>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    ///
    /// Keep the returned id to unsubscribe; dropping the receiver also works,
    /// the entry is pruned on the next publish.
    pub async fn subscribe(&self) -> (SubscriberId, UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = unbounded_channel();
        let id = SubscriberId::new();

        let mut guard = self.inner.write().await;
        guard.push(Subscriber { id, sender: tx });

        tracing::debug!(
            subscriber = ?id,
            total = guard.len(),
            "change feed subscriber added"
        );

        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|s| s.id != id);

        if before != guard.len() {
            tracing::debug!(subscriber = ?id, remaining = guard.len(), "change feed subscriber removed");
        }
    }

    /// Deliver `event` to every subscriber, dropping those whose receiver is gone.
    pub async fn publish(&self, event: StoreEvent) {
        let mut guard = self.inner.write().await;
        let before = guard.len();

        guard.retain(|subscriber| subscriber.sender.send(event.clone()).is_ok());

        let after = guard.len();
        if before != after {
            tracing::debug!(
                pruned = before - after,
                active = after,
                "change feed dropped dead subscribers"
            );
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.len()
    }
}
