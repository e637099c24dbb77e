use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One playable item for the track player queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

impl Track {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            thumbnail: None,
            duration_seconds: None,
        }
    }
}

/// Remote-control action carried by a `music_control` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicAction {
    Pause,
    Resume,
    Next,
    Previous,
    Stop,
}

impl MusicAction {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pause" => Self::Pause,
            "resume" | "play" => Self::Resume,
            "next" => Self::Next,
            "previous" | "prev" => Self::Previous,
            "stop" => Self::Stop,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Next => "next",
            Self::Previous => "previous",
            Self::Stop => "stop",
        }
    }
}

/// One server-side tool invocation surfaced for transcript markers.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

/// Stream event emitted by the frame parser after normalization.
///
/// A single wire frame may carry several recognized fields; the parser emits
/// one `StreamEvent` per field, in a fixed canonical order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Server assigned a persistent id to the in-flight assistant message.
    MessageSaved { id: String },
    /// Server paused generation to request a privileged client-side action.
    ClientToolCall {
        name: String,
        args: Value,
        tool_call_id: String,
    },
    /// Server-side tool activity announced for transcript markers.
    ToolCalls { calls: Vec<ToolInvocation> },
    SearchComplete { query: String },
    FileToolComplete { tag: String },
    DeepSearchUpdate { message: String },
    Plan { text: String },
    MusicPlay { track: Track },
    MusicQueueAdd { track: Track },
    MusicControl { action: MusicAction },
    ThinkingDelta { delta: String },
    /// Incremental content/thinking deltas for the in-flight message.
    MessageDelta {
        content: Option<String>,
        thinking: Option<String>,
    },
    Error { text: String },
    /// Decoded synthesized-speech chunk.
    VoiceAudio {
        audio: Vec<u8>,
        sentence: Option<String>,
    },
}
