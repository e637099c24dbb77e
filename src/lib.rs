//! Client-side streaming conversation session engine.
//!
//! A [`ChatSession`] consumes the backend's incremental response protocol
//! (line-delimited, `data: `-prefixed JSON frames parsed by the `chat_api`
//! crate), mutates an in-place [`Transcript`] with strict append-only
//! content semantics, and coordinates two independent playback engines
//! from the `audio_playback` crate without blocking transcript delivery.
//!
//! The server may pause generation mid-stream to request a privileged
//! client-side action; the [`ConsentCoordinator`] suspends the turn,
//! exposes the pending request to an external approver, and resumes the
//! same logical turn with the tool's result while preserving the partial
//! transcript accumulated before the pause.

pub mod capabilities;
pub mod consent;
pub mod error;
pub mod model;
pub mod session;
pub mod transcript;
pub mod transport;

pub use capabilities::{execute_tool, CapabilityProvider, WorkspaceCapabilities};
pub use consent::{ConsentCoordinator, PendingToolCall, ResolvedToolCall, ToolVerdict};
pub use error::{CapabilityError, SessionError};
pub use model::{
    Conversation, Feedback, FinalizeReason, Message, RecordedToolCall, Role,
    EMPTY_RESPONSE_PLACEHOLDER,
};
pub use session::{ChatSession, SessionNotification};
pub use transcript::Transcript;
pub use transport::{HttpTransport, Transport, TransportError};
