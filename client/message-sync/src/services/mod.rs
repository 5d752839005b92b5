pub mod dispatcher;
pub mod projector;
pub mod reconciler;
pub mod remote_api;

pub use dispatcher::OutboundDispatcher;
pub use projector::{project, ConversationProjector, ProjectorWatch};
pub use reconciler::{IgnoreReason, InboundReconciler, ReconcileOutcome, ReconcileScope};
pub use remote_api::{HttpMessageApi, MessageApi};
