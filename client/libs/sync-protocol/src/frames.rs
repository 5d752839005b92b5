use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Message, MessageStatus};

/// Live-channel frames sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Announces the connection's user so the server can route pushes to it
    #[serde(rename = "register")]
    Register {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },

    /// Delivery / read acknowledgement for a message
    #[serde(rename = "updateStatus")]
    UpdateStatus {
        #[serde(rename = "messageId")]
        message_id: Uuid,
        status: MessageStatus,
    },
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Register { .. } => "register",
            ClientFrame::UpdateStatus { .. } => "updateStatus",
        }
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Live-channel frames pushed from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "newMessage")]
    NewMessage { message: Message },

    #[serde(rename = "statusUpdate")]
    StatusUpdate {
        #[serde(rename = "messageId")]
        message_id: Uuid,
        status: MessageStatus,
    },
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::NewMessage { .. } => "newMessage",
            ServerFrame::StatusUpdate { .. } => "statusUpdate",
        }
    }

    /// Decode one inbound text frame.
    ///
    /// Returns `Ok(None)` for well-formed frames of a type this client does
    /// not handle. Unparseable JSON, a missing `type`, or a known type with a
    /// bad body is an error.
    pub fn decode(text: &str) -> ProtocolResult<Option<Self>> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        match kind {
            "newMessage" | "statusUpdate" => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Body of `PUT /messages/{id}/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub message_id: Uuid,
    pub status: MessageStatus,
}
