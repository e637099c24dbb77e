use std::time::{Duration, Instant};

use chat_api::{StreamEvent, ToolInvocation};
use log::{debug, warn};

use crate::error::SessionError;
use crate::model::{
    Feedback, FinalizeReason, Message, RecordedToolCall, Role, EMPTY_RESPONSE_PLACEHOLDER,
};

/// Content/thinking delta notifications are coalesced to this interval;
/// marker events always notify immediately.
pub const CONTENT_NOTIFY_THROTTLE: Duration = Duration::from_millis(100);

/// Ordered message list for one conversation plus the single in-flight
/// assistant message.
///
/// `apply_event` mutates the in-flight message in place and reports whether
/// the caller should emit a transcript-changed notification now. Content is
/// append-only while streaming; a finalized message is only mutable through
/// [`Transcript::edit_message`].
pub struct Transcript {
    conversation_id: String,
    messages: Vec<Message>,
    streaming_index: Option<usize>,
    notify_throttle: Duration,
    last_content_notify: Option<Instant>,
}

impl Transcript {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self::with_throttle(conversation_id, CONTENT_NOTIFY_THROTTLE)
    }

    pub fn with_throttle(conversation_id: impl Into<String>, notify_throttle: Duration) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            streaming_index: None,
            notify_throttle,
            last_content_notify: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn streaming_index(&self) -> Option<usize> {
        self.streaming_index
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.streaming_index.and_then(|index| self.messages.get(index))
    }

    pub fn push_user_message(&mut self, content: impl Into<String>) -> usize {
        self.messages
            .push(Message::user(self.conversation_id.clone(), content));
        self.messages.len() - 1
    }

    /// Open a new empty assistant message and make it the in-flight one.
    /// Any previous in-flight message is finalized first.
    pub fn begin_turn(&mut self) -> usize {
        if self.streaming_index.is_some() {
            self.finalize(FinalizeReason::Stopped);
        }

        self.messages
            .push(Message::assistant_streaming(self.conversation_id.clone()));
        let index = self.messages.len() - 1;
        self.streaming_index = Some(index);
        self.last_content_notify = None;
        index
    }

    /// Re-open the last assistant message after a tool-call pause, keeping
    /// its accumulated content and thinking as the resumption baseline.
    pub fn resume_turn(&mut self) -> bool {
        let Some(index) = self.last_assistant_index() else {
            warn!("cannot resume a turn: transcript has no assistant message");
            return false;
        };

        self.messages[index].is_streaming = true;
        self.streaming_index = Some(index);
        self.last_content_notify = None;
        true
    }

    /// Apply one stream event; returns whether the caller should notify its
    /// observer now. Side-channel events (music, voice audio, tool-call
    /// pause) are not transcript business and are ignored here.
    pub fn apply_event(&mut self, event: &StreamEvent) -> bool {
        match event {
            StreamEvent::MessageDelta { content, thinking } => {
                let mut mutated = false;
                if let Some(content) = content {
                    mutated |= self.append_content(content);
                }
                if let Some(thinking) = thinking {
                    mutated |= self.append_thinking(thinking);
                }
                mutated && self.take_content_notify_slot()
            }
            StreamEvent::ThinkingDelta { delta } => {
                self.append_thinking(delta) && self.take_content_notify_slot()
            }
            StreamEvent::Plan { text } => self.with_streaming(|message| {
                message.plan = Some(text.clone());
                true
            }),
            StreamEvent::ToolCalls { calls } => self.apply_tool_calls(calls),
            StreamEvent::SearchComplete { query } => self.with_streaming(|message| {
                // An item never marked active completes as a no-op.
                if message.active_searches.remove(query) {
                    message.completed_searches.insert(query.clone());
                    true
                } else {
                    debug!("search_complete for inactive query '{query}' ignored");
                    false
                }
            }),
            StreamEvent::FileToolComplete { tag } => self.with_streaming(|message| {
                message.completed_file_actions.insert(tag.clone())
            }),
            StreamEvent::DeepSearchUpdate { message: update } => {
                self.with_streaming(|message| {
                    message.deep_search_updates.push(update.clone());
                    true
                })
            }
            StreamEvent::MessageSaved { id } => self.assign_saved_id(id),
            StreamEvent::Error { text } => {
                self.append_error_marker(text);
                true
            }
            StreamEvent::ClientToolCall { .. }
            | StreamEvent::MusicPlay { .. }
            | StreamEvent::MusicQueueAdd { .. }
            | StreamEvent::MusicControl { .. }
            | StreamEvent::VoiceAudio { .. } => false,
        }
    }

    /// Close the in-flight message. Returns its final content, or `None` if
    /// nothing was streaming (finalize is idempotent).
    pub fn finalize(&mut self, reason: FinalizeReason) -> Option<String> {
        let index = self.streaming_index.take()?;
        let message = &mut self.messages[index];
        message.is_streaming = false;

        let substitute_placeholder = matches!(reason, FinalizeReason::Done | FinalizeReason::Error)
            && message.content.trim().is_empty();
        if substitute_placeholder {
            message.content = EMPTY_RESPONSE_PLACEHOLDER.to_string();
        }

        self.last_content_notify = None;
        Some(self.messages[index].content.clone())
    }

    /// Append an inline error marker to the in-flight message content.
    pub fn append_error_marker(&mut self, text: &str) {
        let marker = text.trim();
        if marker.is_empty() {
            return;
        }
        self.with_streaming(|message| {
            if !message.content.is_empty() && !message.content.ends_with('\n') {
                message.content.push_str("\n\n");
            }
            message.content.push_str("[error] ");
            message.content.push_str(marker);
            true
        });
    }

    /// Append a non-duplicating marker describing an executed tool action.
    pub fn append_action_marker(&mut self, marker: &str) -> bool {
        let Some(index) = self.last_assistant_index() else {
            return false;
        };

        let message = &mut self.messages[index];
        if message.content.contains(marker) {
            return false;
        }
        if !message.content.is_empty() {
            message.content.push('\n');
        }
        message.content.push_str(marker);
        true
    }

    /// The only mutation path for finalized content.
    pub fn edit_message(&mut self, index: usize, content: impl Into<String>) -> Result<(), SessionError> {
        let message = self
            .messages
            .get_mut(index)
            .ok_or(SessionError::UnknownMessage { index })?;
        if message.is_streaming {
            return Err(SessionError::MessageStreaming { index });
        }

        message.content = content.into();
        Ok(())
    }

    pub fn set_feedback(
        &mut self,
        index: usize,
        feedback: Option<Feedback>,
    ) -> Result<(), SessionError> {
        let message = self
            .messages
            .get_mut(index)
            .ok_or(SessionError::UnknownMessage { index })?;
        if message.is_streaming {
            return Err(SessionError::MessageStreaming { index });
        }

        message.feedback = feedback;
        Ok(())
    }

    fn append_content(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        self.streaming_mut()
            .map(|message| {
                message.content.push_str(delta);
                true
            })
            .unwrap_or(false)
    }

    fn append_thinking(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        self.streaming_mut()
            .map(|message| {
                message.thinking.get_or_insert_with(String::new).push_str(delta);
                true
            })
            .unwrap_or(false)
    }

    fn apply_tool_calls(&mut self, calls: &[ToolInvocation]) -> bool {
        let mut mutated = false;
        for call in calls {
            mutated |= self.apply_tool_call(call);
        }
        mutated
    }

    fn apply_tool_call(&mut self, call: &ToolInvocation) -> bool {
        let Some(target) = tool_call_target(call) else {
            debug!("tool call '{}' carries no recognized target; skipped", call.name);
            return false;
        };

        let marker = format!("[[{}: {}]]", call.name, target);
        let is_search = call.name.contains("search");

        self.with_streaming(|message| {
            let thinking = message.thinking.get_or_insert_with(String::new);
            if thinking.contains(&marker) {
                return false;
            }

            if !thinking.is_empty() {
                thinking.push('\n');
            }
            thinking.push_str(&marker);
            message.tool_calls.push(RecordedToolCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            if is_search {
                message.active_searches.insert(target.clone());
            }
            true
        })
    }

    fn assign_saved_id(&mut self, id: &str) -> bool {
        // Positional correlation: the persisted id belongs to the last
        // assistant message, the only one that can be in flight.
        let Some(index) = self.last_assistant_index() else {
            warn!("message_saved with no assistant message in transcript");
            return false;
        };

        self.messages[index].id = Some(id.to_string());
        true
    }

    fn last_assistant_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|message| message.role == Role::Assistant)
    }

    fn streaming_mut(&mut self) -> Option<&mut Message> {
        let index = self.streaming_index?;
        self.messages.get_mut(index)
    }

    fn with_streaming(&mut self, apply: impl FnOnce(&mut Message) -> bool) -> bool {
        match self.streaming_mut() {
            Some(message) => apply(message),
            None => {
                debug!("stream event arrived with no in-flight message; ignored");
                false
            }
        }
    }

    fn take_content_notify_slot(&mut self) -> bool {
        let now = Instant::now();
        let due = self
            .last_content_notify
            .map(|last| now.duration_since(last) >= self.notify_throttle)
            .unwrap_or(true);
        if due {
            self.last_content_notify = Some(now);
        }
        due
    }
}

fn tool_call_target(call: &ToolInvocation) -> Option<String> {
    let arguments = call.arguments.as_object()?;
    for key in ["query", "path", "target"] {
        if let Some(value) = arguments.get(key).and_then(|value| value.as_str()) {
            return Some(value.to_string());
        }
    }
    None
}
