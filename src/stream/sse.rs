//! SSE line classification and frame encoding.
//!
//! Field semantics follow the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html):
//! one optional space after the colon is stripped, `:` lines are comments and
//! unknown fields are ignored.

/// Payload the backend sends as its final `data:` entry.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One logical line of the backend's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Empty line (frame separator).
    Blank,
    /// `: ...` comment / keep-alive.
    Comment,
    /// `event:`, `id:` or `retry:`; ignored.
    Field,
    /// `data:` with its payload (one leading space stripped).
    Data(&'a str),
    /// Anything else; only meaningful as continuation of a split payload.
    Raw(&'a str),
}

/// Classify one line. A trailing `\r` is stripped first.
#[must_use]
pub fn classify_line(line: &str) -> SseLine<'_> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.is_empty() {
        return SseLine::Blank;
    }
    if line.starts_with(':') {
        return SseLine::Comment;
    }
    if let Some(value) = line.strip_prefix("data:") {
        return SseLine::Data(value.strip_prefix(' ').unwrap_or(value));
    }
    if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
        return SseLine::Field;
    }
    SseLine::Raw(line)
}

/// Check if a `data:` payload is the end-of-stream sentinel.
#[must_use]
pub fn is_done_payload(payload: &str) -> bool {
    payload.trim() == DONE_SENTINEL
}

/// Format a named SSE frame: `event: {name}\ndata: {json}\n\n`.
#[must_use]
pub fn named_sse_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_data_lines() {
        assert_eq!(classify_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(classify_line("data:nospace"), SseLine::Data("nospace"));
        assert_eq!(classify_line("data:"), SseLine::Data(""));
        assert_eq!(classify_line("data: [DONE]\r"), SseLine::Data("[DONE]"));
    }

    #[test]
    fn test_classify_other_lines() {
        assert_eq!(classify_line(""), SseLine::Blank);
        assert_eq!(classify_line("\r"), SseLine::Blank);
        assert_eq!(classify_line(": keep-alive"), SseLine::Comment);
        assert_eq!(classify_line("event: chunk"), SseLine::Field);
        assert_eq!(classify_line("id: 7"), SseLine::Field);
        assert_eq!(classify_line("\"tail\"}}]}"), SseLine::Raw("\"tail\"}}]}"));
    }

    #[test]
    fn test_is_done_payload() {
        assert!(is_done_payload("[DONE]"));
        assert!(is_done_payload(" [DONE] "));
        assert!(!is_done_payload("{\"content\":\"[DONE]\"}"));
    }

    #[test]
    fn test_named_sse_frame() {
        assert_eq!(
            named_sse_frame("message_stop", r#"{"type":"message_stop"}"#),
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"
        );
    }
}
