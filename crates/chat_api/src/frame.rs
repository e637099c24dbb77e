use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use serde_json::Value;

use crate::events::{MusicAction, StreamEvent, ToolInvocation, Track};

/// Sentinel payload that terminates a stream without a trailing event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental parser for newline-delimited "data: " frames.
///
/// The upstream protocol is additive: a frame is a JSON object whose
/// recognized fields each map to one [`StreamEvent`], discriminated by field
/// presence rather than a variant tag. Several fields may co-occur on one
/// frame; all of them are surfaced, in canonical field order.
///
/// Malformed input never aborts the stream: empty lines, unprefixed lines,
/// and JSON parse failures all yield zero events.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
}

impl FrameParser {
    /// Feed arbitrary bytes into the parser and drain events from every
    /// complete line received so far.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find('\n') {
            let line = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 1);
            events.extend(parse_line(&line));
        }

        events
    }

    /// Parse a complete stream body in one shot.
    pub fn parse_all(input: &str) -> Vec<StreamEvent> {
        let mut parser = Self::default();
        let mut events = parser.feed(input.as_bytes());
        // A final line without a trailing newline is still a complete frame.
        let tail = std::mem::take(&mut parser.buffer);
        events.extend(parse_line(&tail));
        events
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

/// Classify one raw text line into zero or more events.
pub fn parse_line(line: &str) -> Vec<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let Some(payload) = trimmed.strip_prefix("data:") else {
        return Vec::new();
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => map_frame(&value),
        Err(error) => {
            debug!("skipping malformed frame: {error}");
            Vec::new()
        }
    }
}

/// Surface every recognized field of a frame as its own event.
///
/// Canonical ordering mirrors the wire vocabulary: persistence and tool
/// control first, transcript markers next, playback last, so a frame that
/// carries both a content delta and a voice chunk applies the text before
/// audio is enqueued.
fn map_frame(value: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(field) = value.get("message_saved") {
        if let Some(id) = string_field(field, "id") {
            events.push(StreamEvent::MessageSaved { id });
        }
    }

    if let Some(field) = value.get("client_tool_call") {
        if let Some(event) = map_client_tool_call(field) {
            events.push(event);
        }
    }

    if let Some(calls) = value.get("tool_calls").and_then(Value::as_array) {
        let calls: Vec<ToolInvocation> = calls.iter().filter_map(map_tool_invocation).collect();
        if !calls.is_empty() {
            events.push(StreamEvent::ToolCalls { calls });
        }
    }

    if let Some(field) = value.get("search_complete") {
        if let Some(query) = string_field(field, "query") {
            events.push(StreamEvent::SearchComplete { query });
        }
    }

    if let Some(field) = value.get("file_tool_complete") {
        if let Some(tag) = string_field(field, "tag") {
            events.push(StreamEvent::FileToolComplete { tag });
        }
    }

    if let Some(field) = value.get("deep_search_update") {
        if let Some(message) = string_field(field, "message") {
            events.push(StreamEvent::DeepSearchUpdate { message });
        }
    }

    if let Some(field) = value.get("plan") {
        if let Some(text) = string_field(field, "text") {
            events.push(StreamEvent::Plan { text });
        }
    }

    if let Some(track) = value.get("music_play").and_then(map_track) {
        events.push(StreamEvent::MusicPlay { track });
    }

    if let Some(field) = value.get("music_queue_add") {
        let item = field.get("item").unwrap_or(field);
        if let Some(track) = map_track(item) {
            events.push(StreamEvent::MusicQueueAdd { track });
        }
    }

    if let Some(field) = value.get("music_control") {
        if let Some(action) = string_field(field, "action").and_then(|raw| MusicAction::parse(&raw))
        {
            events.push(StreamEvent::MusicControl { action });
        }
    }

    if let Some(field) = value.get("thinking") {
        if let Some(delta) = string_field(field, "delta") {
            events.push(StreamEvent::ThinkingDelta { delta });
        }
    }

    if let Some(field) = value.get("message") {
        let content = field
            .get("content")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let thinking = field
            .get("thinking")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        if content.is_some() || thinking.is_some() {
            events.push(StreamEvent::MessageDelta { content, thinking });
        }
    }

    if let Some(field) = value.get("error") {
        if let Some(text) = string_field(field, "text") {
            events.push(StreamEvent::Error { text });
        }
    }

    if let Some(field) = value.get("voice_audio") {
        if let Some(event) = map_voice_audio(field) {
            events.push(event);
        }
    }

    events
}

fn map_client_tool_call(field: &Value) -> Option<StreamEvent> {
    let name = field.get("name")?.as_str()?.to_string();
    let tool_call_id = field.get("tool_call_id")?.as_str()?.to_string();
    let args = parse_arguments(field.get("args").cloned().unwrap_or(Value::Null));

    Some(StreamEvent::ClientToolCall {
        name,
        args,
        tool_call_id,
    })
}

fn map_tool_invocation(entry: &Value) -> Option<ToolInvocation> {
    let function = entry.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = parse_arguments(function.get("arguments").cloned().unwrap_or(Value::Null));

    Some(ToolInvocation { name, arguments })
}

/// Tool arguments arrive either as a JSON object or as a JSON-encoded string.
fn parse_arguments(raw: Value) -> Value {
    match raw {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}

fn map_track(field: &Value) -> Option<Track> {
    let url = field.get("url")?.as_str()?.to_string();
    let title = field
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or(&url)
        .to_string();
    let thumbnail = field
        .get("thumbnail")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    let duration_seconds = field.get("duration").and_then(Value::as_u64);

    Some(Track {
        url,
        title,
        thumbnail,
        duration_seconds,
    })
}

fn map_voice_audio(field: &Value) -> Option<StreamEvent> {
    let encoded = field.get("audio")?.as_str()?;
    let audio = match BASE64.decode(encoded) {
        Ok(bytes) => bytes,
        Err(error) => {
            debug!("skipping voice chunk with undecodable audio: {error}");
            return None;
        }
    };
    let sentence = field
        .get("sentence")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    Some(StreamEvent::VoiceAudio { audio, sentence })
}

/// Accept both `{"field": {"key": "x"}}` and the bare `{"field": "x"}` shape
/// the upstream protocol has used for scalar event kinds.
fn string_field(field: &Value, key: &str) -> Option<String> {
    match field {
        Value::String(value) => Some(value.clone()),
        Value::Object(map) => map.get(key).and_then(Value::as_str).map(ToString::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_line, FrameParser};
    use crate::events::{MusicAction, StreamEvent};

    #[test]
    fn ignores_blank_unprefixed_and_sentinel_lines() {
        assert!(parse_line("").is_empty());
        assert!(parse_line("   ").is_empty());
        assert!(parse_line("event: ping").is_empty());
        assert!(parse_line("data: [DONE]").is_empty());
        assert!(parse_line("data:").is_empty());
    }

    #[test]
    fn malformed_json_is_skipped_without_poisoning_later_frames() {
        let mut parser = FrameParser::default();
        let mut events = parser.feed(b"data: {not valid json\n");
        events.extend(parser.feed(b"data: {\"message\":{\"content\":\"ok\"}}\n"));

        assert_eq!(
            events,
            vec![StreamEvent::MessageDelta {
                content: Some("ok".to_string()),
                thinking: None,
            }]
        );
    }

    #[test]
    fn feed_buffers_partial_lines_across_chunks() {
        let mut parser = FrameParser::default();
        assert!(parser.feed(b"data: {\"message\":{\"co").is_empty());
        let events = parser.feed(b"ntent\":\"Hi\"}}\n");

        assert_eq!(events.len(), 1);
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn multi_field_frame_surfaces_every_event_in_canonical_order() {
        let frame = json!({
            "message": {"content": "searching"},
            "search_complete": {"query": "rust"},
            "message_saved": {"id": "m-1"},
        });
        let events = parse_line(&format!("data: {frame}"));

        assert_eq!(
            events,
            vec![
                StreamEvent::MessageSaved {
                    id: "m-1".to_string(),
                },
                StreamEvent::SearchComplete {
                    query: "rust".to_string(),
                },
                StreamEvent::MessageDelta {
                    content: Some("searching".to_string()),
                    thinking: None,
                },
            ]
        );
    }

    #[test]
    fn client_tool_call_parses_string_encoded_args() {
        let frame = json!({
            "client_tool_call": {
                "name": "read_file",
                "args": "{\"path\":\"notes.txt\"}",
                "tool_call_id": "call-7",
            }
        });
        let events = parse_line(&format!("data: {frame}"));

        assert_eq!(
            events,
            vec![StreamEvent::ClientToolCall {
                name: "read_file".to_string(),
                args: json!({"path": "notes.txt"}),
                tool_call_id: "call-7".to_string(),
            }]
        );
    }

    #[test]
    fn tool_calls_extract_function_name_and_arguments() {
        let frame = json!({
            "tool_calls": [
                {"function": {"name": "search", "arguments": {"query": "jazz"}}},
                {"function": {"name": "create_file", "arguments": "{\"path\":\"a.txt\"}"}},
                {"id": "missing function key"},
            ]
        });
        let events = parse_line(&format!("data: {frame}"));

        let StreamEvent::ToolCalls { calls } = &events[0] else {
            panic!("expected tool_calls event");
        };
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments, json!({"query": "jazz"}));
        assert_eq!(calls[1].arguments, json!({"path": "a.txt"}));
    }

    #[test]
    fn voice_audio_decodes_base64_and_keeps_sentence() {
        let frame = json!({
            "voice_audio": {"audio": "aGVsbG8=", "sentence": "hello"}
        });
        let events = parse_line(&format!("data: {frame}"));

        assert_eq!(
            events,
            vec![StreamEvent::VoiceAudio {
                audio: b"hello".to_vec(),
                sentence: Some("hello".to_string()),
            }]
        );
    }

    #[test]
    fn voice_audio_with_invalid_base64_is_dropped() {
        let frame = json!({"voice_audio": {"audio": "%%%not-base64%%%"}});
        assert!(parse_line(&format!("data: {frame}")).is_empty());
    }

    #[test]
    fn music_events_map_tracks_and_actions() {
        let frame = json!({
            "music_play": {"url": "https://t/1", "title": "One", "duration": 183},
            "music_queue_add": {"item": {"url": "https://t/2", "title": "Two"}},
            "music_control": {"action": "next"},
        });
        let events = parse_line(&format!("data: {frame}"));

        assert_eq!(events.len(), 3);
        let StreamEvent::MusicPlay { track } = &events[0] else {
            panic!("expected music_play first");
        };
        assert_eq!(track.duration_seconds, Some(183));
        assert_eq!(
            events[2],
            StreamEvent::MusicControl {
                action: MusicAction::Next,
            }
        );
    }

    #[test]
    fn scalar_fields_accept_bare_string_shape() {
        let events = parse_line(r#"data: {"search_complete": "weather", "error": "backend hiccup"}"#);

        assert_eq!(
            events,
            vec![
                StreamEvent::SearchComplete {
                    query: "weather".to_string(),
                },
                StreamEvent::Error {
                    text: "backend hiccup".to_string(),
                },
            ]
        );
    }

    #[test]
    fn parse_all_handles_missing_trailing_newline() {
        let body = "data: {\"thinking\":{\"delta\":\"hm\"}}\ndata: {\"message\":{\"content\":\"done\"}}";
        let events = FrameParser::parse_all(body);
        assert_eq!(events.len(), 2);
    }
}
