//! # Inbound Reconciler
//!
//! Applies live-channel pushes to the message store, one frame at a time in
//! arrival order:
//!
//! - `newMessage`: insert when unknown, otherwise merge only its status. A
//!   newly inserted message from the other participant is acknowledged with an
//!   `updateStatus(delivered)` frame.
//! - `statusUpdate`: monotonic status merge; unknown ids are ignored rather
//!   than fabricated.

use async_trait::async_trait;
use std::sync::Arc;
use sync_protocol::{ClientFrame, Message, MessageStatus, ServerFrame};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::store::MessageStore;
use crate::transport::{FrameHandler, FrameSender};

/// Which inbound messages a reconciler accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileScope {
    /// Only messages sent to or by this peer (one open conversation)
    Peer(Uuid),
    /// Everything addressed to or sent by the current user, plus feed posts
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OutOfScope,
    /// Our own message echoed back while the dispatcher already holds it
    OwnEcho,
    UnknownMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Inserted {
        message_id: Uuid,
        acknowledged: bool,
    },
    StatusMerged {
        message_id: Uuid,
        status: MessageStatus,
        applied: bool,
    },
    Ignored(IgnoreReason),
}

pub struct InboundReconciler {
    current_user: Uuid,
    scope: ReconcileScope,
    store: Arc<MessageStore>,
    outbound: Arc<dyn FrameSender>,
}

impl InboundReconciler {
    pub fn new(
        current_user: Uuid,
        scope: ReconcileScope,
        store: Arc<MessageStore>,
        outbound: Arc<dyn FrameSender>,
    ) -> Self {
        Self {
            current_user,
            scope,
            store,
            outbound,
        }
    }

    pub fn current_user(&self) -> Uuid {
        self.current_user
    }

    pub fn scope(&self) -> ReconcileScope {
        self.scope
    }

    pub async fn apply(&self, frame: ServerFrame) -> SyncResult<ReconcileOutcome> {
        match frame {
            ServerFrame::NewMessage { message } => self.apply_new_message(message).await,
            ServerFrame::StatusUpdate { message_id, status } => {
                self.apply_status(message_id, status).await
            }
        }
    }

    fn in_scope(&self, message: &Message) -> bool {
        match self.scope {
            ReconcileScope::Peer(peer) => {
                message.sender_id == peer || message.recipient_id == Some(peer)
            }
            ReconcileScope::Session => message.is_feed_post || message.involves(self.current_user),
        }
    }

    async fn apply_new_message(&self, message: Message) -> SyncResult<ReconcileOutcome> {
        if !self.in_scope(&message) {
            tracing::debug!(message_id = %message.id, "inbound message outside scope");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::OutOfScope));
        }

        let own = message.sender_id == self.current_user;
        if self.store.contains(message.id).await {
            if own {
                return Ok(ReconcileOutcome::Ignored(IgnoreReason::OwnEcho));
            }
            return self.apply_status(message.id, message.status).await;
        }

        let message_id = message.id;
        let status = message.status;
        match self.store.insert(message).await {
            Ok(_) => {}
            // Confirmed by the dispatcher between the lookup and the insert.
            Err(SyncError::DuplicateId(_)) if own => {
                return Ok(ReconcileOutcome::Ignored(IgnoreReason::OwnEcho));
            }
            Err(SyncError::DuplicateId(_)) => return self.apply_status(message_id, status).await,
            Err(e) => return Err(e),
        }
        tracing::debug!(message_id = %message_id, own, "inbound message inserted");

        let acknowledged = if self.needs_ack(own, message_id).await {
            self.acknowledge(message_id).await
        } else {
            false
        };
        Ok(ReconcileOutcome::Inserted {
            message_id,
            acknowledged,
        })
    }

    async fn needs_ack(&self, own: bool, message_id: Uuid) -> bool {
        if own {
            return false;
        }
        self.store
            .get(message_id)
            .await
            .map(|m| !m.is_feed_post && m.recipient_id == Some(self.current_user))
            .unwrap_or(false)
    }

    /// Tell the sender the message arrived, then record it locally.
    async fn acknowledge(&self, message_id: Uuid) -> bool {
        let frame = ClientFrame::UpdateStatus {
            message_id,
            status: MessageStatus::Delivered,
        };
        if let Err(e) = self.outbound.send(frame).await {
            tracing::warn!(message_id = %message_id, error = %e, "delivery acknowledgement failed");
            return false;
        }
        if let Err(e) = self
            .store
            .update_status(message_id, MessageStatus::Delivered)
            .await
        {
            tracing::warn!(message_id = %message_id, error = %e, "local delivered merge failed");
        }
        true
    }

    async fn apply_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
    ) -> SyncResult<ReconcileOutcome> {
        match self.store.update_status(message_id, status).await {
            Ok(merge) => Ok(ReconcileOutcome::StatusMerged {
                message_id,
                status: merge.message().status,
                applied: merge.was_applied(),
            }),
            Err(SyncError::NotFound(_)) => {
                tracing::debug!(message_id = %message_id, status = %status, "status for unknown message ignored");
                Ok(ReconcileOutcome::Ignored(IgnoreReason::UnknownMessage))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl FrameHandler for InboundReconciler {
    async fn handle(&self, frame: ServerFrame) {
        let kind = frame.kind();
        match self.apply(frame).await {
            Ok(outcome) => tracing::trace!(kind, ?outcome, "frame reconciled"),
            Err(e) => tracing::error!(kind, error = %e, "failed to reconcile frame"),
        }
    }
}
