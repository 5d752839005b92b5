use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};
use crate::timestamp;

/// Delivery status of a message.
///
/// Variants are declared in transition order, so the derived `Ord` is the
/// Sent < Delivered < Read order used for monotonic merging.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    /// Whether moving to `next` is a forward transition.
    pub fn advances_to(self, next: MessageStatus) -> bool {
        next > self
    }

    /// Monotonic merge: the later of the two statuses.
    pub fn merge(self, other: MessageStatus) -> MessageStatus {
        self.max(other)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown status: {other}"
            ))),
        }
    }
}

/// A chat message or club feed post as exchanged with the backend.
///
/// Feed posts are broadcast to everyone and carry no recipient; direct
/// messages always carry one. `timestamp` is set once at compose time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<Uuid>,
    pub content: String,
    #[serde(rename = "isClubFeedPost", alias = "isFeedPost")]
    pub is_feed_post: bool,
    #[serde(with = "timestamp::millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    /// Compose a direct message with a fresh client-side id.
    pub fn direct(sender_id: Uuid, recipient_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id: Some(recipient_id),
            content: content.into(),
            is_feed_post: false,
            timestamp: timestamp::now_millis(),
            status: MessageStatus::Sent,
        }
    }

    /// Compose a feed post visible to all participants.
    pub fn feed_post(sender_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id: None,
            content: content.into(),
            is_feed_post: true,
            timestamp: timestamp::now_millis(),
            status: MessageStatus::Sent,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    /// Exactly one of "is a feed post" and "has a recipient" must hold.
    pub fn validate(&self) -> ProtocolResult<()> {
        match (self.is_feed_post, self.recipient_id) {
            (true, None) | (false, Some(_)) => Ok(()),
            (true, Some(recipient)) => Err(ProtocolError::InvalidMessage(format!(
                "feed post {} must not have a recipient (got {recipient})",
                self.id
            ))),
            (false, None) => Err(ProtocolError::InvalidMessage(format!(
                "direct message {} has no recipient",
                self.id
            ))),
        }
    }

    /// Whether `user_id` sent or received this message.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.recipient_id == Some(user_id)
    }

    /// The participant on the other side of a direct message, seen from `user_id`.
    ///
    /// `None` for feed posts and for messages `user_id` is not part of.
    pub fn counterpart(&self, user_id: Uuid) -> Option<Uuid> {
        if self.is_feed_post {
            return None;
        }
        if self.sender_id == user_id {
            self.recipient_id
        } else if self.recipient_id == Some(user_id) {
            Some(self.sender_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order_is_sent_delivered_read() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Read);
        assert!(MessageStatus::Sent.advances_to(MessageStatus::Read));
        assert!(!MessageStatus::Read.advances_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Delivered.advances_to(MessageStatus::Delivered));
    }

    #[test]
    fn test_merge_never_regresses() {
        assert_eq!(
            MessageStatus::Read.merge(MessageStatus::Sent),
            MessageStatus::Read
        );
        assert_eq!(
            MessageStatus::Sent.merge(MessageStatus::Delivered),
            MessageStatus::Delivered
        );
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            "delivered".parse::<MessageStatus>().unwrap(),
            MessageStatus::Delivered
        );
        assert!("seen".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_validate_feed_and_direct() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(Message::direct(alice, bob, "hi").validate().is_ok());
        assert!(Message::feed_post(alice, "hello all").validate().is_ok());

        let mut broken = Message::feed_post(alice, "oops");
        broken.recipient_id = Some(bob);
        assert!(matches!(
            broken.validate(),
            Err(ProtocolError::InvalidMessage(_))
        ));

        let mut orphan = Message::direct(alice, bob, "lost");
        orphan.recipient_id = None;
        assert!(orphan.validate().is_err());
    }

    #[test]
    fn test_counterpart() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let msg = Message::direct(alice, bob, "hi");

        assert_eq!(msg.counterpart(alice), Some(bob));
        assert_eq!(msg.counterpart(bob), Some(alice));
        assert_eq!(msg.counterpart(carol), None);
        assert_eq!(Message::feed_post(alice, "news").counterpart(alice), None);
    }

    #[test]
    fn test_wire_field_names() {
        let alice = Uuid::new_v4();
        let msg = Message::feed_post(alice, "ride at noon");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["senderId"], alice.to_string());
        assert_eq!(value["isClubFeedPost"], true);
        assert_eq!(value["status"], "sent");
        assert!(value["timestamp"].is_i64());
        assert!(value.get("recipientId").is_none());
    }
}
