/// Default base URL for conversation backend requests.
pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.halcyonchat.app";

/// Normalize a base URL to the streaming turn endpoint.
///
/// Normalization rules:
/// 1) keep `/chat/stream` unchanged
/// 2) append `/stream` when the path ends in `/chat`
/// 3) append `/chat/stream` otherwise
pub fn normalize_stream_url(input: &str) -> String {
    let trimmed = trimmed_base(input);
    if trimmed.ends_with("/chat/stream") {
        return trimmed.to_string();
    }
    if trimmed.ends_with("/chat") {
        return format!("{trimmed}/stream");
    }
    format!("{trimmed}/chat/stream")
}

/// Endpoint for asynchronous server-side title generation.
pub fn title_url(input: &str) -> String {
    sibling_endpoint(input, "title")
}

/// Endpoint for best-effort persistence of partial assistant content.
pub fn partial_url(input: &str) -> String {
    sibling_endpoint(input, "partial")
}

fn sibling_endpoint(input: &str, leaf: &str) -> String {
    let stream = normalize_stream_url(input);
    let base = stream.trim_end_matches("/stream").trim_end_matches('/');
    format!("{base}/{leaf}")
}

fn trimmed_base(input: &str) -> &str {
    let base = if input.trim().is_empty() {
        DEFAULT_CHAT_BASE_URL
    } else {
        input.trim()
    };
    base.trim_end_matches('/')
}
