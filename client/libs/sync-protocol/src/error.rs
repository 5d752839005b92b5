//! Error types for the sync wire protocol

use thiserror::Error;

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or validating wire data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not valid JSON or does not match the expected shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Live-channel frame without a string `type` discriminator
    #[error("frame has no type field")]
    MissingType,

    /// Message breaks the recipient / feed-post rule
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
