//! Two devices exchanging messages through in-memory channels.

use async_trait::async_trait;
use message_sync::error::{SyncError, SyncResult};
use message_sync::events::{ChangeFeed, StoreEvent};
use message_sync::services::MessageApi;
use message_sync::store::MessageStore;
use message_sync::transport::MemoryChannel;
use message_sync::{Config, SyncSession};
use serde_json::json;
use std::sync::Arc;
use sync_protocol::{ClientFrame, Message, MessageStatus, ServerFrame};
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Backend that accepts every message as-is
struct AcceptingApi;

#[async_trait]
impl MessageApi for AcceptingApi {
    async fn submit(&self, message: &Message) -> SyncResult<Message> {
        Ok(message.clone())
    }

    async fn update_status(&self, _message_id: Uuid, _status: MessageStatus) -> SyncResult<()> {
        Ok(())
    }
}

struct Device {
    session: SyncSession,
    channel: Arc<MemoryChannel>,
}

async fn device(user_id: Uuid) -> Device {
    let store = Arc::new(MessageStore::in_memory(ChangeFeed::new()));
    let channel = Arc::new(MemoryChannel::new());
    let session = SyncSession::new(user_id, store, channel.clone(), Arc::new(AcceptingApi)).await;
    session.connect().await.unwrap();
    channel.take_sent().await;
    Device { session, channel }
}

/// Forward every status frame `from` emitted to `to` as a server push.
async fn relay_statuses(from: &Device, to: &Device) -> usize {
    let mut relayed = 0;
    for frame in from.channel.take_sent().await {
        if let ClientFrame::UpdateStatus { message_id, status } = frame {
            to.channel
                .deliver(ServerFrame::StatusUpdate { message_id, status })
                .await
                .unwrap();
            relayed += 1;
        }
    }
    relayed
}

#[tokio::test]
async fn test_delivered_then_read_reaches_sender_in_order() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let alice = device(a).await;
    let bob = device(b).await;
    let (_sub, mut alice_events) = alice.session.subscribe().await;

    let m1 = alice.session.send_message(b, "hi").await.unwrap();
    assert_eq!(m1.status, MessageStatus::Sent);

    bob.channel
        .deliver(ServerFrame::NewMessage {
            message: m1.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        bob.session.store().get(m1.id).await.map(|m| m.status),
        Some(MessageStatus::Delivered)
    );
    assert_eq!(relay_statuses(&bob, &alice).await, 1);
    assert_eq!(
        alice.session.store().get(m1.id).await.map(|m| m.status),
        Some(MessageStatus::Delivered)
    );

    assert_eq!(bob.session.mark_conversation_read(a).await.unwrap(), 1);
    assert_eq!(bob.session.mark_conversation_read(a).await.unwrap(), 0);
    assert_eq!(relay_statuses(&bob, &alice).await, 1);
    assert_eq!(
        alice.session.store().get(m1.id).await.map(|m| m.status),
        Some(MessageStatus::Read)
    );

    // A late duplicate of the delivered ack changes nothing.
    alice
        .channel
        .deliver(ServerFrame::StatusUpdate {
            message_id: m1.id,
            status: MessageStatus::Delivered,
        })
        .await
        .unwrap();

    let mut history = Vec::new();
    while let Ok(event) = alice_events.try_recv() {
        if let StoreEvent::StatusChanged { message_id, status, .. } = event {
            assert_eq!(message_id, m1.id);
            history.push(status);
        }
    }
    assert_eq!(history, vec![MessageStatus::Delivered, MessageStatus::Read]);
}

#[tokio::test]
async fn test_conversations_track_store_changes() {
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let alice = device(a).await;

    assert!(alice.session.conversations().await.is_empty());

    alice.session.send_message(b, "to bob").await.unwrap();
    alice.session.post_to_feed("arena closed").await.unwrap();
    alice
        .channel
        .deliver(ServerFrame::NewMessage {
            message: Message::direct(c, a, "from carol"),
        })
        .await
        .unwrap();
    alice
        .channel
        .deliver(ServerFrame::NewMessage {
            message: Message::feed_post(c, "farrier on tuesday"),
        })
        .await
        .unwrap();

    let conversations = alice.session.conversations().await;
    let others: Vec<Uuid> = conversations.iter().map(|c| c.other_user_id).collect();
    assert_eq!(others.len(), 2);
    assert!(others.contains(&b) && others.contains(&c));
    assert_eq!(alice.session.feed().await.len(), 2);
    assert_eq!(alice.session.conversation(c).await.len(), 1);
}

#[tokio::test]
async fn test_conversations_refresh_right_after_each_write() {
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let alice = device(a).await;
    assert!(alice.session.conversations().await.is_empty());

    alice.session.send_message(b, "first").await.unwrap();
    assert_eq!(alice.session.conversations().await.len(), 1);

    let incoming = Message::direct(c, a, "second");
    alice
        .channel
        .deliver(ServerFrame::NewMessage {
            message: incoming.clone(),
        })
        .await
        .unwrap();
    let conversations = alice.session.conversations().await;
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].other_user_id, c);
    assert_eq!(conversations[0].latest_status, MessageStatus::Delivered);

    alice
        .channel
        .deliver(ServerFrame::StatusUpdate {
            message_id: incoming.id,
            status: MessageStatus::Read,
        })
        .await
        .unwrap();
    let conversations = alice.session.conversations().await;
    assert_eq!(conversations[0].latest_status, MessageStatus::Read);
    assert_eq!(conversations[0].unread_count, 0);
}

#[tokio::test]
async fn test_mark_read_requires_connection() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let alice = device(a).await;
    alice.session.disconnect().await.unwrap();

    let err = alice.session.mark_conversation_read(b).await.unwrap_err();
    assert!(matches!(err, SyncError::NotConnected));
}

#[tokio::test]
async fn test_file_backed_session_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(|request: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            ResponseTemplate::new(200).set_body_json(body)
        })
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::for_endpoints(format!("{}/api/v1", server.uri()), "ws://127.0.0.1:9");
    config.store_dir = Some(dir.path().to_path_buf());
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let sent = {
        let session = SyncSession::from_config(&config, a).await.unwrap();
        let sent = session.send_message(b, "see you at the barn").await.unwrap();
        session
            .update_status(sent.id, MessageStatus::Delivered)
            .await
            .unwrap();
        sent
    };

    let reopened = SyncSession::from_config(&config, a).await.unwrap();
    let thread = reopened.conversation(b).await;

    assert_eq!(thread.len(), 1);
    let restored = thread.first().unwrap();
    assert_eq!(restored.id, sent.id);
    assert_eq!(restored.content, "see you at the barn");
    assert_eq!(restored.status, MessageStatus::Delivered);
    assert_eq!(restored.timestamp, sent.timestamp);
}
