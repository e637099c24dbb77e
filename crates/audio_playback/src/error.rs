use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output device unavailable: {0}")]
    Device(String),

    #[error("failed to decode audio source: {0}")]
    Decode(String),

    #[error("playback backend failure: {0}")]
    Backend(String),

    #[error("backend cannot play this source kind: {0}")]
    UnsupportedSource(String),

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PlaybackError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
