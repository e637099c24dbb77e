use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no pending tool call to resolve")]
    NoPendingToolCall,

    #[error("message {index} does not exist")]
    UnknownMessage { index: usize },

    #[error("message {index} is still streaming and cannot be edited")]
    MessageStreaming { index: usize },

    #[error("failed to spawn session worker: {0}")]
    WorkerSpawn(std::io::Error),
}

/// Failure of an injected client-side capability (read/search/create).
///
/// These never abort a turn: the coordinator converts them into a textual
/// failure result and resumes through the normal path.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("path escapes workspace root: {0}")]
    PathEscape(String),

    #[error("path must not be empty")]
    EmptyPath,

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("tool '{tool}' is missing required argument '{argument}'")]
    MissingArgument {
        tool: &'static str,
        argument: &'static str,
    },

    #[error("file {path} is not valid UTF-8 text")]
    NotUtf8 { path: String },

    #[error("file {path} exceeds max read size ({size} bytes > {limit} bytes)")]
    TooLarge {
        path: String,
        size: usize,
        limit: usize,
    },

    #[error("I/O error while {operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CapabilityError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
