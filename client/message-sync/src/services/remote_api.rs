//! Request/response client for the messaging backend
//!
//! Distinct from the live channel: submissions and REST status updates go
//! through here and return a definite success or failure.

use async_trait::async_trait;
use reqwest::{Client, Response};
use sync_protocol::{Message, MessageStatus, StatusChange};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Submit a locally authored message; the returned message is the
    /// server's canonical copy (its id and status are authoritative).
    async fn submit(&self, message: &Message) -> SyncResult<Message>;

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> SyncResult<()>;
}

/// `reqwest`-backed [`MessageApi`]
#[derive(Clone)]
pub struct HttpMessageApi {
    client: Client,
    base_url: String,
}

impl HttpMessageApi {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: Response) -> SyncResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(status = status.as_u16(), body = %body, "backend rejected request");
        Err(SyncError::RemoteRejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn submit(&self, message: &Message) -> SyncResult<Message> {
        let url = format!("{}/message", self.base_url);
        info!(message_id = %message.id, url = %url, "submitting message");

        let response = self.client.post(&url).json(message).send().await?;
        let response = Self::check(response).await?;

        let canonical: Message = response.json().await?;
        debug!(
            local_id = %message.id,
            server_id = %canonical.id,
            status = %canonical.status,
            "message accepted"
        );
        Ok(canonical)
    }

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> SyncResult<()> {
        let url = format!("{}/messages/{}/status", self.base_url, message_id);
        info!(message_id = %message_id, status = %status, "updating message status");

        let body = StatusChange { message_id, status };
        let response = self.client.put(&url).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
