//! Wire contract for StableCircle message sync
//!
//! Shared by the sync engine and anything that talks to the same backend:
//! the message record and its status order, the live-channel frames, and the
//! REST bodies. Timestamps are epoch milliseconds on the wire.
pub mod error;
pub mod frames;
pub mod message;
pub mod timestamp;

// Re-export commonly used types
pub use error::{ProtocolError, ProtocolResult};
pub use frames::{ClientFrame, ServerFrame, StatusChange};
pub use message::{Message, MessageStatus};
