//! Client-side message synchronisation engine.
//!
//! Keeps a durable local message store consistent with the backend through
//! two paths: authored messages are persisted and then submitted over REST,
//! while pushes from the live WebSocket channel are reconciled into the
//! store. Conversation summaries are projected from the store on demand.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod services;
pub mod session;
pub mod store;
pub mod transport;

pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use session::SyncSession;
pub use sync_protocol::{Message, MessageStatus};
