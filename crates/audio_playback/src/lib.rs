//! Cancellable audio playback engines for the conversation session.
//!
//! Two independent engines share one backend seam:
//! - [`SpeechQueue`] drains synthesized-speech chunks strictly FIFO, one
//!   audible chunk at a time, writing each payload to scratch storage for
//!   the duration of playback.
//! - [`TrackPlayer`] owns a track queue with repeat semantics and a
//!   monotonically increasing generation counter that discards completion
//!   callbacks from superseded backend instances.
//!
//! Backends implement [`PlaybackBackend`]; the engines depend only on that
//! trait, so a managed native sink and an externally spawned media process
//! behave identically from the caller's perspective.

pub mod backend;
pub mod error;
pub mod native;
pub mod process;
pub mod scratch;
pub mod speech;
#[cfg(test)]
pub(crate) mod testutil;
pub mod tracks;

pub use backend::{platform_backend, BackendExit, BackendInstance, CompletionFn, PlaybackBackend, PlaybackSource};
pub use error::PlaybackError;
pub use native::NativeBackend;
pub use process::ProcessBackend;
pub use scratch::{ScratchStorage, TempDirScratch};
pub use speech::{SpeechChunk, SpeechQueue};
pub use tracks::{PlaybackStatus, PlayerState, RepeatMode, Track, TrackPlayer};
