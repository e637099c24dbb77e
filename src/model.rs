use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Shown when a turn completes without producing any content.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "No response was generated.";

/// Client-side title fallback keeps this many characters of the first
/// user message.
pub const TITLE_TRUNCATION_CHARS: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: String,
    /// Set at most once, by the server title endpoint or by client-side
    /// truncation of the first user message.
    pub title: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| String::new()),
            title: None,
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Like,
    Dislike,
}

/// A recorded server-side tool invocation, kept for transcript display.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedToolCall {
    pub name: String,
    pub arguments: Value,
}

/// One transcript entry. At most one message per conversation has
/// `is_streaming = true`; its `content` and `thinking` grow append-only
/// until it is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<String>,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
    pub thinking: Option<String>,
    pub plan: Option<String>,
    pub active_searches: BTreeSet<String>,
    pub completed_searches: BTreeSet<String>,
    pub completed_file_actions: BTreeSet<String>,
    pub deep_search_updates: Vec<String>,
    pub tool_calls: Vec<RecordedToolCall>,
    pub feedback: Option<Feedback>,
    pub generated_images: Vec<String>,
    pub is_generating_image: bool,
}

impl Message {
    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            conversation_id: conversation_id.into(),
            role: Role::User,
            content: content.into(),
            is_streaming: false,
            thinking: None,
            plan: None,
            active_searches: BTreeSet::new(),
            completed_searches: BTreeSet::new(),
            completed_file_actions: BTreeSet::new(),
            deep_search_updates: Vec::new(),
            tool_calls: Vec::new(),
            feedback: None,
            generated_images: Vec::new(),
            is_generating_image: false,
        }
    }

    /// Empty assistant message opened at the start of a turn.
    pub fn assistant_streaming(conversation_id: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            is_streaming: true,
            ..Self::user(conversation_id, "")
        }
    }
}

/// Why an in-flight message stopped streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    Done,
    Error,
    Stopped,
    /// Paused for a tool-call consent verdict; the turn logically continues
    /// after resumption.
    Interrupted,
}

/// Client-side title fallback: first line of the seed, truncated on a char
/// boundary with an ellipsis.
pub fn truncate_title(seed: &str) -> String {
    let first_line = seed.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= TITLE_TRUNCATION_CHARS {
        return first_line.to_string();
    }

    let truncated: String = first_line.chars().take(TITLE_TRUNCATION_CHARS).collect();
    format!("{}…", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::{truncate_title, Conversation, Message, TITLE_TRUNCATION_CHARS};

    #[test]
    fn conversations_get_unique_ids() {
        let first = Conversation::new();
        let second = Conversation::new();
        assert_ne!(first.id, second.id);
        assert!(first.title.is_none());
    }

    #[test]
    fn short_titles_pass_through_untruncated() {
        assert_eq!(truncate_title("What is Rust?"), "What is Rust?");
    }

    #[test]
    fn long_titles_are_truncated_on_char_boundaries() {
        let seed = "é".repeat(200);
        let title = truncate_title(&seed);
        assert_eq!(title.chars().count(), TITLE_TRUNCATION_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn title_fallback_uses_only_the_first_line() {
        assert_eq!(truncate_title("hello\nworld"), "hello");
    }

    #[test]
    fn assistant_messages_start_empty_and_streaming() {
        let message = Message::assistant_streaming("c1");
        assert!(message.is_streaming);
        assert!(message.content.is_empty());
        assert!(message.thinking.is_none());
    }
}
