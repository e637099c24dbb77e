use serde::{Deserialize, Serialize};

/// Request payload for one streamed turn.
///
/// A resumed turn after a tool-call pause reuses the same shape with
/// `tool_result` populated and `content` left empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub voice_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultPayload>,
}

impl TurnRequest {
    pub fn new(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: content.into(),
            attachment: None,
            voice_enabled: false,
            tool_result: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_voice(mut self, enabled: bool) -> Self {
        self.voice_enabled = enabled;
        self
    }

    /// Builds the resumption request that re-enters a paused turn.
    pub fn resumption(conversation_id: impl Into<String>, tool_result: ToolResultPayload) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: String::new(),
            attachment: None,
            voice_enabled: false,
            tool_result: Some(tool_result),
        }
    }
}

/// Optional user attachment carried with the first request of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// Result of a client-side tool call, submitted when resuming a paused turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub name: String,
    pub result: String,
    pub tool_call_id: String,
}

/// Payload for the server-side title generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRequest {
    pub conversation_id: String,
    /// First user message, used by the server to seed the title.
    pub seed: String,
}

/// Response body of the title endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleResponse {
    pub title: String,
}

/// Payload for best-effort persistence of interrupted partial content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialContentRequest {
    pub conversation_id: String,
    pub content: String,
}
