//! Conversation summary shown in the inbox list
//!
//! Derived from the message store on every projection and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_protocol::{timestamp, Message, MessageStatus};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// The participant who is not the current user
    pub other_user_id: Uuid,
    /// Content of the most recent message
    pub latest_message: String,
    pub latest_message_id: Uuid,
    pub latest_status: MessageStatus,
    #[serde(with = "timestamp::millis")]
    pub timestamp: DateTime<Utc>,
    /// Messages from the other participant not yet read
    pub unread_count: usize,
}

impl Conversation {
    pub(crate) fn from_latest(other_user_id: Uuid, latest: &Message, unread_count: usize) -> Self {
        Self {
            other_user_id,
            latest_message: latest.content.clone(),
            latest_message_id: latest.id,
            latest_status: latest.status,
            timestamp: latest.timestamp,
            unread_count,
        }
    }

    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}
