use sync_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

pub type SyncResult<T> = Result<T, SyncError>;

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

#[derive(Debug, Error, Clone)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport channel is not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("message {0} already exists")]
    DuplicateId(Uuid),

    #[error("message {0} not found")]
    NotFound(Uuid),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("remote rejected request (status {status}): {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidMessage(msg) => SyncError::InvalidMessage(msg),
            other => SyncError::Decode(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else {
            SyncError::Send(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Send(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

impl SyncError {
    /// Returns whether resubmitting the same request may succeed.
    ///
    /// The engine never retries on its own; this is a hint for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Send(_) | SyncError::Connect(_) | SyncError::NotConnected => {
                ErrorKind::Retryable
            }
            SyncError::RemoteRejected { status, .. } if *status >= 500 || *status == 429 => {
                ErrorKind::Retryable
            }
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}
