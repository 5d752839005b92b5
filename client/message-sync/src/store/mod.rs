//! Message Store: the single owner of message records for a session.
//!
//! All writes go through one async mutex, so the unique-id and monotonic
//! status rules are checked and applied as one step. A record is persisted to
//! the object store before it becomes visible in memory, and every committed
//! write is published on the [`ChangeFeed`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use sync_protocol::{Message, MessageStatus};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::events::{ChangeFeed, StoreEvent};

pub mod object_store;

pub use object_store::{JsonFileObjectStore, MemoryObjectStore, ObjectStore};

/// Persisted form of a record. `seq` is the insertion order.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    seq: u64,
    message: Message,
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    message: Message,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<Uuid, Entry>,
    next_seq: u64,
}

impl StoreState {
    /// Records in insertion order.
    fn ordered(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.records.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub exclude_feed_posts: bool,
    pub order: SortOrder,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            exclude_feed_posts: true,
            order: SortOrder::Ascending,
        }
    }
}

impl QueryOptions {
    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn include_feed_posts(mut self) -> Self {
        self.exclude_feed_posts = false;
        self
    }
}

/// Result of a status merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMerge {
    /// The status moved forward; holds the updated record
    Applied(Message),
    /// The record already had an equal or later status
    Unchanged(Message),
}

impl StatusMerge {
    pub fn message(&self) -> &Message {
        match self {
            StatusMerge::Applied(m) | StatusMerge::Unchanged(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            StatusMerge::Applied(m) | StatusMerge::Unchanged(m) => m,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, StatusMerge::Applied(_))
    }
}

/// Ordered snapshot returned by store queries.
///
/// Cheap to clone; iterate it as many times as needed.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    items: Arc<[Message]>,
}

impl MessageQuery {
    fn new(items: Vec<Message>) -> Self {
        Self {
            items: items.into(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&Message> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&Message> {
        self.items.last()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.items.to_vec()
    }
}

impl<'a> IntoIterator for &'a MessageQuery {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct MessageStore {
    state: Mutex<StoreState>,
    backend: Arc<dyn ObjectStore>,
    changes: ChangeFeed,
}

impl MessageStore {
    /// Load every record already held by `backend`.
    ///
    /// Records that fail to decode are skipped with a warning rather than
    /// failing the whole session.
    pub async fn open(backend: Arc<dyn ObjectStore>, changes: ChangeFeed) -> SyncResult<Self> {
        let mut state = StoreState::default();

        for key in backend.keys().await? {
            let Some(bytes) = backend.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<StoredRecord>(&bytes) {
                Ok(record) => {
                    state.next_seq = state.next_seq.max(record.seq + 1);
                    state.records.insert(
                        record.message.id,
                        Entry {
                            seq: record.seq,
                            message: record.message,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable message record");
                }
            }
        }

        tracing::info!(records = state.records.len(), "message store opened");

        Ok(Self {
            state: Mutex::new(state),
            backend,
            changes,
        })
    }

    /// Empty store backed by process memory.
    pub fn in_memory(changes: ChangeFeed) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            backend: Arc::new(MemoryObjectStore::new()),
            changes,
        }
    }

    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Add a new record. Fails with `DuplicateId` when the id is taken.
    pub async fn insert(&self, message: Message) -> SyncResult<Message> {
        message.validate()?;

        let mut state = self.state.lock().await;
        if state.records.contains_key(&message.id) {
            return Err(SyncError::DuplicateId(message.id));
        }

        let seq = state.next_seq;
        self.persist(seq, &message).await?;
        state.next_seq += 1;
        state.records.insert(
            message.id,
            Entry {
                seq,
                message: message.clone(),
            },
        );
        tracing::debug!(message_id = %message.id, seq, "message inserted");

        self.changes
            .publish(StoreEvent::Inserted(message.clone()))
            .await;
        Ok(message)
    }

    /// Monotonic status merge.
    ///
    /// A status at or below the current one is a successful no-op. Fails with
    /// `NotFound` for unknown ids.
    pub async fn update_status(&self, id: Uuid, status: MessageStatus) -> SyncResult<StatusMerge> {
        let mut state = self.state.lock().await;
        self.merge_status_locked(&mut state, id, status).await
    }

    /// Move the record stored under `old_id` to `new_id`.
    ///
    /// If `new_id` is already present (the server echo arrived first) the two
    /// records collapse into one under `new_id`, keeping the original
    /// record's position and the later of the two statuses.
    pub async fn replace_id(&self, old_id: Uuid, new_id: Uuid) -> SyncResult<Message> {
        let mut state = self.state.lock().await;
        self.replace_id_locked(&mut state, old_id, new_id).await
    }

    /// Apply the server's canonical copy of a locally authored message:
    /// adopt its id, then merge its status.
    ///
    /// Returns `Ok(None)` when the local record no longer exists, in which
    /// case nothing is written.
    pub async fn confirm(&self, local_id: Uuid, canonical: &Message) -> SyncResult<Option<Message>> {
        let mut state = self.state.lock().await;
        if !state.records.contains_key(&local_id) {
            return Ok(None);
        }

        if local_id != canonical.id {
            self.replace_id_locked(&mut state, local_id, canonical.id)
                .await?;
        }
        let merged = self
            .merge_status_locked(&mut state, canonical.id, canonical.status)
            .await?;
        Ok(Some(merged.into_message()))
    }

    pub async fn get(&self, id: Uuid) -> Option<Message> {
        self.state
            .lock()
            .await
            .records
            .get(&id)
            .map(|e| e.message.clone())
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.state.lock().await.records.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages `participant` sent or received, ordered by timestamp.
    ///
    /// Equal timestamps keep insertion order.
    pub async fn query(&self, participant: Uuid, options: QueryOptions) -> MessageQuery {
        self.select(options.order, |m| {
            m.involves(participant) && !(options.exclude_feed_posts && m.is_feed_post)
        })
        .await
    }

    /// The direct messages exchanged between `user_id` and `peer_id`, oldest first.
    pub async fn conversation(&self, user_id: Uuid, peer_id: Uuid) -> MessageQuery {
        self.select(SortOrder::Ascending, |m| {
            !m.is_feed_post
                && ((m.sender_id == user_id && m.recipient_id == Some(peer_id))
                    || (m.sender_id == peer_id && m.recipient_id == Some(user_id)))
        })
        .await
    }

    /// Feed posts, newest first.
    pub async fn feed_posts(&self) -> MessageQuery {
        self.select(SortOrder::Descending, |m| m.is_feed_post).await
    }

    /// Every record in insertion order.
    pub async fn snapshot(&self) -> Vec<Message> {
        let state = self.state.lock().await;
        state
            .ordered()
            .into_iter()
            .map(|e| e.message.clone())
            .collect()
    }

    async fn select<F>(&self, order: SortOrder, filter: F) -> MessageQuery
    where
        F: Fn(&Message) -> bool,
    {
        let state = self.state.lock().await;
        let mut matched: Vec<&Entry> = state
            .records
            .values()
            .filter(|e| filter(&e.message))
            .collect();

        matched.sort_by(|a, b| {
            a.message
                .timestamp
                .cmp(&b.message.timestamp)
                .then(a.seq.cmp(&b.seq))
        });
        if order == SortOrder::Descending {
            matched.reverse();
        }

        MessageQuery::new(matched.into_iter().map(|e| e.message.clone()).collect())
    }

    async fn merge_status_locked(
        &self,
        state: &mut StoreState,
        id: Uuid,
        status: MessageStatus,
    ) -> SyncResult<StatusMerge> {
        let entry = state.records.get(&id).ok_or(SyncError::NotFound(id))?;

        if !entry.message.status.advances_to(status) {
            tracing::debug!(
                message_id = %id,
                current = %entry.message.status,
                requested = %status,
                "status update ignored"
            );
            return Ok(StatusMerge::Unchanged(entry.message.clone()));
        }

        let seq = entry.seq;
        let updated = entry.message.clone().with_status(status);
        self.persist(seq, &updated).await?;

        if let Some(entry) = state.records.get_mut(&id) {
            entry.message.status = status;
        }
        tracing::debug!(message_id = %id, status = %status, "status advanced");

        self.changes
            .publish(StoreEvent::StatusChanged {
                message_id: id,
                status,
                sender_id: updated.sender_id,
                recipient_id: updated.recipient_id,
            })
            .await;
        Ok(StatusMerge::Applied(updated))
    }

    async fn replace_id_locked(
        &self,
        state: &mut StoreState,
        old_id: Uuid,
        new_id: Uuid,
    ) -> SyncResult<Message> {
        let entry = state
            .records
            .get(&old_id)
            .cloned()
            .ok_or(SyncError::NotFound(old_id))?;
        if old_id == new_id {
            return Ok(entry.message);
        }

        let mut moved = entry.message.clone().with_id(new_id);
        if let Some(existing) = state.records.get(&new_id) {
            tracing::debug!(
                old_id = %old_id,
                new_id = %new_id,
                "collapsing echoed record into confirmed message"
            );
            moved.status = moved.status.merge(existing.message.status);
        }

        self.persist(entry.seq, &moved).await?;
        if let Err(e) = self.backend.delete(&old_id.to_string()).await {
            // The in-memory view is already correct; the stale file only
            // matters after a restart.
            tracing::error!(old_id = %old_id, error = %e, "failed to delete replaced record");
        }

        state.records.remove(&old_id);
        state.records.insert(
            new_id,
            Entry {
                seq: entry.seq,
                message: moved.clone(),
            },
        );
        tracing::debug!(old_id = %old_id, new_id = %new_id, "message id replaced");

        self.changes
            .publish(StoreEvent::IdReplaced {
                old_id,
                message: moved.clone(),
            })
            .await;
        Ok(moved)
    }

    async fn persist(&self, seq: u64, message: &Message) -> SyncResult<()> {
        let record = StoredRecord {
            seq,
            message: message.clone(),
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| SyncError::Storage(format!("encode record {}: {e}", message.id)))?;
        self.backend.put(&message.id.to_string(), bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn store() -> MessageStore {
        MessageStore::in_memory(ChangeFeed::new())
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = store();
        let msg = Message::direct(Uuid::new_v4(), Uuid::new_v4(), "hi");

        store.insert(msg.clone()).await.unwrap();
        let err = store.insert(msg.clone()).await.unwrap_err();

        assert!(matches!(err, SyncError::DuplicateId(id) if id == msg.id));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_message() {
        let store = store();
        let mut msg = Message::direct(Uuid::new_v4(), Uuid::new_v4(), "hi");
        msg.is_feed_post = true;

        assert!(matches!(
            store.insert(msg).await,
            Err(SyncError::InvalidMessage(_))
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_status_is_max_of_all_updates() {
        let orders = [
            [MessageStatus::Read, MessageStatus::Sent, MessageStatus::Delivered],
            [MessageStatus::Delivered, MessageStatus::Read, MessageStatus::Sent],
            [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Delivered],
        ];
        let expected = [
            MessageStatus::Read,
            MessageStatus::Read,
            MessageStatus::Delivered,
        ];

        for (sequence, expected) in orders.iter().zip(expected) {
            let store = store();
            let msg = store
                .insert(Message::direct(Uuid::new_v4(), Uuid::new_v4(), "hi"))
                .await
                .unwrap();
            for status in sequence {
                store.update_status(msg.id, *status).await.unwrap();
            }
            assert_eq!(store.get(msg.id).await.unwrap().status, expected);
        }
    }

    #[tokio::test]
    async fn test_update_status_reports_noop() {
        let store = store();
        let msg = store
            .insert(Message::direct(Uuid::new_v4(), Uuid::new_v4(), "hi"))
            .await
            .unwrap();

        let applied = store
            .update_status(msg.id, MessageStatus::Delivered)
            .await
            .unwrap();
        assert!(applied.was_applied());

        let again = store
            .update_status(msg.id, MessageStatus::Delivered)
            .await
            .unwrap();
        assert!(!again.was_applied());
        assert_eq!(again.message().status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_update_status_unknown_id() {
        let store = store();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.update_status(id, MessageStatus::Read).await,
            Err(SyncError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_replace_id_leaves_single_record() {
        let store = store();
        let alice = Uuid::new_v4();
        let msg = store
            .insert(Message::direct(alice, Uuid::new_v4(), "hi"))
            .await
            .unwrap();
        let server_id = Uuid::new_v4();

        store.replace_id(msg.id, server_id).await.unwrap();

        let results = store.query(alice, QueryOptions::default()).await;
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|m| m.id != msg.id));
        assert_eq!(results.first().unwrap().id, server_id);
        assert!(store.get(msg.id).await.is_none());
    }

    #[tokio::test]
    async fn test_replace_id_missing_record() {
        let store = store();
        let old = Uuid::new_v4();
        assert!(matches!(
            store.replace_id(old, Uuid::new_v4()).await,
            Err(SyncError::NotFound(id)) if id == old
        ));
    }

    #[tokio::test]
    async fn test_replace_id_collapses_with_echo() {
        let store = store();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let local = store
            .insert(Message::direct(alice, bob, "hi").with_timestamp(at(100)))
            .await
            .unwrap();
        let server_id = Uuid::new_v4();
        store
            .insert(
                local
                    .clone()
                    .with_id(server_id)
                    .with_status(MessageStatus::Delivered),
            )
            .await
            .unwrap();

        let merged = store.replace_id(local.id, server_id).await.unwrap();

        assert_eq!(merged.status, MessageStatus::Delivered);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(server_id).await.unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_confirm_applies_id_and_status() {
        let store = store();
        let local = store
            .insert(Message::direct(Uuid::new_v4(), Uuid::new_v4(), "hi"))
            .await
            .unwrap();
        let canonical = local
            .clone()
            .with_id(Uuid::new_v4())
            .with_status(MessageStatus::Delivered);

        let confirmed = store.confirm(local.id, &canonical).await.unwrap().unwrap();
        assert_eq!(confirmed.id, canonical.id);
        assert_eq!(confirmed.status, MessageStatus::Delivered);
        assert_eq!(confirmed.timestamp, local.timestamp);

        // Originating record is gone now.
        assert_eq!(store.confirm(local.id, &canonical).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_order_and_feed_filter() {
        let store = store();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let late = store
            .insert(Message::direct(alice, bob, "late").with_timestamp(at(300)))
            .await
            .unwrap();
        let early = store
            .insert(Message::direct(bob, alice, "early").with_timestamp(at(100)))
            .await
            .unwrap();
        let post = store
            .insert(Message::feed_post(alice, "news").with_timestamp(at(200)))
            .await
            .unwrap();

        let asc: Vec<Uuid> = store
            .query(alice, QueryOptions::default())
            .await
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(asc, vec![early.id, late.id]);

        let query = store
            .query(alice, QueryOptions::default().include_feed_posts().descending())
            .await;
        let desc: Vec<Uuid> = query.iter().map(|m| m.id).collect();
        assert_eq!(desc, vec![late.id, post.id, early.id]);

        // Restartable: a second pass yields the same sequence.
        let again: Vec<Uuid> = (&query).into_iter().map(|m| m.id).collect();
        assert_eq!(again, desc);
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let store = store();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let first = store
            .insert(Message::direct(alice, bob, "one").with_timestamp(at(100)))
            .await
            .unwrap();
        let second = store
            .insert(Message::direct(bob, alice, "two").with_timestamp(at(100)))
            .await
            .unwrap();

        let ids: Vec<Uuid> = store
            .conversation(alice, bob)
            .await
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_conversation_excludes_other_peers() {
        let store = store();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        store
            .insert(Message::direct(alice, bob, "to bob"))
            .await
            .unwrap();
        store
            .insert(Message::direct(carol, alice, "from carol"))
            .await
            .unwrap();

        let thread = store.conversation(alice, bob).await;
        assert_eq!(thread.len(), 1);
        assert_eq!(thread.first().unwrap().content, "to bob");
    }

    #[tokio::test]
    async fn test_feed_posts_newest_first() {
        let store = store();
        let alice = Uuid::new_v4();
        store
            .insert(Message::feed_post(alice, "old").with_timestamp(at(1)))
            .await
            .unwrap();
        store
            .insert(Message::feed_post(alice, "new").with_timestamp(at(2)))
            .await
            .unwrap();
        store
            .insert(Message::direct(alice, Uuid::new_v4(), "dm"))
            .await
            .unwrap();

        let feed: Vec<String> = store
            .feed_posts()
            .await
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(feed, vec!["new".to_string(), "old".to_string()]);
    }

    #[tokio::test]
    async fn test_reopen_restores_records_and_order() {
        let backend: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let first = {
            let store = MessageStore::open(backend.clone(), ChangeFeed::new())
                .await
                .unwrap();
            let first = store
                .insert(Message::direct(alice, bob, "one").with_timestamp(at(5)))
                .await
                .unwrap();
            store
                .update_status(first.id, MessageStatus::Read)
                .await
                .unwrap();
            first
        };

        let reopened = MessageStore::open(backend, ChangeFeed::new())
            .await
            .unwrap();
        assert_eq!(
            reopened.get(first.id).await.unwrap().status,
            MessageStatus::Read
        );

        let second = reopened
            .insert(Message::direct(bob, alice, "two").with_timestamp(at(5)))
            .await
            .unwrap();
        let order: Vec<Uuid> = reopened.snapshot().await.iter().map(|m| m.id).collect();
        assert_eq!(order, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_open_skips_corrupt_records() {
        let backend = Arc::new(MemoryObjectStore::new());
        backend.put("garbage", b"{not json".to_vec()).await.unwrap();

        let store = MessageStore::open(backend, ChangeFeed::new()).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_writes_publish_events() {
        let feed = ChangeFeed::new();
        let (_id, mut rx) = feed.subscribe().await;
        let store = MessageStore::in_memory(feed);

        let msg = store
            .insert(Message::direct(Uuid::new_v4(), Uuid::new_v4(), "hi"))
            .await
            .unwrap();
        store
            .update_status(msg.id, MessageStatus::Sent)
            .await
            .unwrap();
        store
            .update_status(msg.id, MessageStatus::Read)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(StoreEvent::Inserted(msg.clone())));
        assert!(matches!(
            rx.recv().await,
            Some(StoreEvent::StatusChanged { status: MessageStatus::Read, .. })
        ));
        assert!(rx.try_recv().is_err());
    }
}
