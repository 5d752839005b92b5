use dotenvy::dotenv;
use reqwest::Url;
use std::env;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::SyncError;

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api/v1";
const DEFAULT_WS_URL: &str = "ws://localhost:3000";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base of the REST endpoints (`{base}/message`, `{base}/messages/{id}/status`)
    pub api_base_url: String,
    /// Live channel endpoint
    pub ws_url: String,
    /// Directory for the file-backed object store; in-memory when unset
    pub store_dir: Option<PathBuf>,
    /// Identity the binary connects as
    pub user_id: Option<Uuid>,
}

impl Config {
    pub fn from_env() -> Result<Self, SyncError> {
        dotenv().ok();

        let api_base_url =
            env::var("SYNC_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        let ws_url = env::var("SYNC_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
        let store_dir = env::var("SYNC_STORE_DIR")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let user_id = match env::var("SYNC_USER_ID") {
            Ok(raw) if !raw.trim().is_empty() => Some(Uuid::parse_str(raw.trim()).map_err(|e| {
                SyncError::Config(format!("SYNC_USER_ID is not a valid UUID: {e}"))
            })?),
            _ => None,
        };

        let config = Self {
            api_base_url,
            ws_url,
            store_dir,
            user_id,
        };
        config.validate()?;
        Ok(config)
    }

    /// Config pointing at explicit endpoints, with an in-memory store.
    pub fn for_endpoints(api_base_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ws_url: ws_url.into(),
            store_dir: None,
            user_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        Self::check_scheme("SYNC_API_BASE_URL", &self.api_base_url, &["http", "https"])?;
        Self::check_scheme("SYNC_WS_URL", &self.ws_url, &["ws", "wss"])?;
        Ok(())
    }

    fn check_scheme(name: &str, value: &str, allowed: &[&str]) -> Result<(), SyncError> {
        let url = Url::parse(value)
            .map_err(|e| SyncError::Config(format!("{name} is not a valid URL: {e}")))?;
        if !allowed.contains(&url.scheme()) {
            return Err(SyncError::Config(format!(
                "{name} must use one of {allowed:?}, got {}",
                url.scheme()
            )));
        }
        Ok(())
    }
}
