use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::PlaybackError;

/// What a backend is asked to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSource {
    /// Local scratch file (speech chunks, downloaded tracks).
    File(PathBuf),
    /// Remote stream URL (track player).
    Url(String),
}

impl PlaybackSource {
    /// Location string handed to subprocess players.
    pub fn location(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
        }
    }
}

/// Terminal condition reported by a backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendExit {
    Completed,
    Failed(String),
}

/// One-shot exit callback. The owning engine tags the closure with the
/// generation active at spawn time; a stale generation is discarded there,
/// so backends may report exits late without corrupting engine state.
pub type CompletionFn = Box<dyn FnOnce(BackendExit) + Send + 'static>;

/// Handle to one running playback instance.
pub trait BackendInstance: Send {
    /// Stop playback. Must be safe to call more than once; the exit
    /// callback may still fire afterwards.
    fn stop(&mut self);

    /// Native pause. Returns false when unsupported, in which case the
    /// engine stops and later restarts from the recorded offset.
    fn pause(&mut self) -> bool {
        false
    }

    /// Resume a natively paused instance.
    fn resume(&mut self) -> bool {
        false
    }

    /// Native seek. Returns false when unsupported, in which case the
    /// engine restarts playback from the desired offset.
    fn seek(&mut self, position: Duration) -> bool {
        let _ = position;
        false
    }
}

/// Platform-neutral playback capability.
///
/// `start` must return promptly once playback is underway (or fail), and
/// arrange for `on_exit` to be invoked exactly once when the instance
/// finishes, fails, or is stopped.
pub trait PlaybackBackend: Send + Sync {
    fn start(
        &self,
        source: &PlaybackSource,
        offset: Duration,
        on_exit: CompletionFn,
    ) -> Result<Box<dyn BackendInstance>, PlaybackError>;
}

/// Select the playback backend for the current platform.
///
/// macOS ships `afplay`, so speech/track playback goes through a spawned
/// media process there; everywhere else the managed rodio sink is used.
pub fn platform_backend() -> Arc<dyn PlaybackBackend> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(crate::process::ProcessBackend::afplay())
    }
    #[cfg(not(target_os = "macos"))]
    {
        Arc::new(crate::native::NativeBackend::new())
    }
}
