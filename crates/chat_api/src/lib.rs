//! Transport-only chat API client primitives.
//!
//! This crate owns request building, streamed frame parsing, and error
//! classification for the conversation backend. It intentionally contains no
//! transcript state and no playback coupling: callers receive a normalized
//! [`StreamEvent`] per recognized wire field and decide what to do with it.
//!
//! The wire protocol is additive and discriminates events by field presence
//! rather than a variant tag, so normalization into the [`StreamEvent`] sum
//! type happens exactly once, at the parser boundary in [`frame`].

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod payload;
pub mod retry;
pub mod url;

pub use client::{CancellationSignal, ChatApiClient};
pub use config::ChatApiConfig;
pub use error::ChatApiError;
pub use events::{MusicAction, StreamEvent, ToolInvocation, Track};
pub use frame::FrameParser;
pub use payload::{Attachment, ToolResultPayload, TurnRequest};
pub use url::normalize_stream_url;
