//! # Outbound Dispatcher
//!
//! Authoring path for new messages: the message is made durable locally
//! before any network attempt, then submitted over REST and reconciled with
//! the server's canonical copy.
//!
//! A failed submission is reported to the caller and leaves the message in
//! the store as `Sent`; nothing is rolled back and nothing is retried here.

use std::sync::Arc;
use sync_protocol::timestamp::now_millis;
use sync_protocol::{Message, MessageStatus};
use uuid::Uuid;

use crate::error::SyncResult;
use crate::services::remote_api::MessageApi;
use crate::store::{MessageStore, StatusMerge};

pub struct OutboundDispatcher {
    store: Arc<MessageStore>,
    api: Arc<dyn MessageApi>,
}

impl OutboundDispatcher {
    pub fn new(store: Arc<MessageStore>, api: Arc<dyn MessageApi>) -> Self {
        Self { store, api }
    }

    /// Author, persist and submit a message.
    ///
    /// Returns the locally stored copy after the server's id and status have
    /// been applied. If the record disappeared while the request was in
    /// flight the server's copy is returned and nothing is written.
    pub async fn send(
        &self,
        sender_id: Uuid,
        recipient_id: Option<Uuid>,
        content: impl Into<String>,
        is_feed_post: bool,
    ) -> SyncResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            content: content.into(),
            is_feed_post,
            timestamp: now_millis(),
            status: MessageStatus::Sent,
        };
        message.validate()?;

        let local = self.store.insert(message).await?;
        tracing::debug!(message_id = %local.id, "message stored locally, submitting");

        let canonical = match self.api.submit(&local).await {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::error!(
                    message_id = %local.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "message submission failed, kept locally as unconfirmed"
                );
                return Err(e);
            }
        };

        match self.store.confirm(local.id, &canonical).await? {
            Some(confirmed) => {
                tracing::info!(
                    local_id = %local.id,
                    message_id = %confirmed.id,
                    status = %confirmed.status,
                    "message confirmed"
                );
                Ok(confirmed)
            }
            None => {
                tracing::warn!(
                    local_id = %local.id,
                    "local record removed before confirmation, result not applied"
                );
                Ok(canonical)
            }
        }
    }

    /// Push a status change over REST, then merge it locally.
    ///
    /// The local record is only touched once the server accepted the change.
    pub async fn update_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> SyncResult<StatusMerge> {
        if let Err(e) = self.api.update_status(message_id, status).await {
            tracing::warn!(message_id = %message_id, status = %status, error = %e, "status update rejected");
            return Err(e);
        }
        self.store.update_status(message_id, status).await
    }
}
