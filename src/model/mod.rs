pub mod event;
pub mod ids;
pub mod message;
pub mod serde_utils;
pub mod state;

pub use event::{RawEvent, Topic, TopicKind};
pub use ids::{ParentSessionId, SessionIdentity, ToolId};
pub use message::{Confidence, MatchReason, MessageKind, NormalizedMessage, Provenance, Subtype};
pub use state::SessionState;
