//! # Conversation Projector
//!
//! Builds the inbox list from the full message collection. Every projection
//! is a full recomputation; the refresh flag only decides whether the last
//! result can be handed out again.
//!
//! A watched projector drains its change-feed receiver before reading the
//! flag. The store publishes before a write returns, so a read issued after
//! any completed write always sees that write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sync_protocol::{Message, MessageStatus};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::events::{ChangeFeed, StoreEvent, SubscriberId};
use crate::models::Conversation;
use crate::store::MessageStore;

struct Group {
    latest: usize,
    unread: usize,
}

/// Summarise `messages` (in insertion order) from `current_user`'s side.
///
/// Feed posts are left out. Each conversation is represented by its newest
/// message; on equal timestamps the later-inserted message wins. The result
/// is ordered newest conversation first.
pub fn project(messages: &[Message], current_user: Uuid) -> Vec<Conversation> {
    let mut groups: HashMap<Uuid, Group> = HashMap::new();

    for (index, message) in messages.iter().enumerate() {
        let Some(other) = message.counterpart(current_user) else {
            continue;
        };
        let unread = usize::from(message.sender_id == other && message.status < MessageStatus::Read);

        groups
            .entry(other)
            .and_modify(|group| {
                if message.timestamp >= messages[group.latest].timestamp {
                    group.latest = index;
                }
                group.unread += unread;
            })
            .or_insert(Group {
                latest: index,
                unread,
            });
    }

    let mut ranked: Vec<(Uuid, Group)> = groups.into_iter().collect();
    ranked.sort_by(|(_, a), (_, b)| {
        let (ma, mb) = (&messages[a.latest], &messages[b.latest]);
        mb.timestamp
            .cmp(&ma.timestamp)
            .then_with(|| b.latest.cmp(&a.latest))
    });

    ranked
        .into_iter()
        .map(|(other, group)| Conversation::from_latest(other, &messages[group.latest], group.unread))
        .collect()
}

/// Inbox view for one user, recomputed when a refresh has been requested.
pub struct ConversationProjector {
    current_user: Uuid,
    store: Arc<MessageStore>,
    refresh: AtomicBool,
    changes: Mutex<Option<UnboundedReceiver<StoreEvent>>>,
    last: Mutex<Option<Vec<Conversation>>>,
}

impl ConversationProjector {
    pub fn new(current_user: Uuid, store: Arc<MessageStore>) -> Self {
        Self {
            current_user,
            store,
            refresh: AtomicBool::new(true),
            changes: Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    pub fn current_user(&self) -> Uuid {
        self.current_user
    }

    pub fn request_refresh(&self) {
        self.refresh.store(true, Ordering::SeqCst);
    }

    pub fn clear_refresh(&self) {
        self.refresh.store(false, Ordering::SeqCst);
    }

    pub fn is_refresh_requested(&self) -> bool {
        self.refresh.load(Ordering::SeqCst)
    }

    /// Current conversation list.
    ///
    /// Recomputes from the store when a refresh is pending (or nothing has
    /// been computed yet) and clears the flag; otherwise returns the previous
    /// projection unchanged.
    pub async fn conversations(&self) -> Vec<Conversation> {
        let mut last = self.last.lock().await;
        self.drain_changes().await;
        // Cleared before recomputing so a change landing meanwhile re-arms it.
        let requested = self.refresh.swap(false, Ordering::SeqCst);

        match last.as_ref() {
            Some(previous) if !requested => previous.clone(),
            _ => {
                let fresh = self.compute().await;
                *last = Some(fresh.clone());
                fresh
            }
        }
    }

    /// Recompute unconditionally, ignoring the refresh flag.
    pub async fn compute(&self) -> Vec<Conversation> {
        let snapshot = self.store.snapshot().await;
        let conversations = project(&snapshot, self.current_user);
        tracing::debug!(
            user_id = %self.current_user,
            conversations = conversations.len(),
            "conversations projected"
        );
        conversations
    }

    /// Raise the refresh flag for every pending change that involves the
    /// current user, then report whether a refresh is pending.
    pub async fn drain_changes(&self) -> bool {
        let mut changes = self.changes.lock().await;
        if let Some(events) = changes.as_mut() {
            let mut relevant = 0usize;
            while let Ok(event) = events.try_recv() {
                if event.involves(self.current_user) {
                    relevant += 1;
                }
            }
            if relevant > 0 {
                tracing::trace!(user_id = %self.current_user, relevant, "store changes drained");
                self.request_refresh();
            }
        }
        self.is_refresh_requested()
    }

    /// Follow `feed` so that changes involving the current user raise the
    /// refresh flag. Replaces any earlier subscription.
    pub async fn watch(&self, feed: &ChangeFeed) -> ProjectorWatch {
        let (subscriber, events) = feed.subscribe().await;
        *self.changes.lock().await = Some(events);
        // Anything committed before the subscription is not in the receiver.
        self.request_refresh();

        ProjectorWatch {
            feed: feed.clone(),
            subscriber,
        }
    }
}

/// Change-feed subscription backing [`ConversationProjector::watch`]
pub struct ProjectorWatch {
    feed: ChangeFeed,
    subscriber: SubscriberId,
}

impl ProjectorWatch {
    pub async fn stop(self) {
        self.feed.unsubscribe(self.subscriber).await;
    }
}
