use memchr::{memchr_iter, memrchr};
use smallvec::SmallVec;

use crate::error::BridgeError;
use crate::json_scan::leading_value_len;
use crate::stream::recovery::preview;

/// Splits a raw byte stream into newline-terminated lines.
///
/// Bytes after the last `\n` are held back until a later chunk completes the
/// line, so multi-byte UTF-8 sequences split across chunks are never decoded
/// early. Lines are returned without their `\n`; a trailing `\r` is left for
/// the SSE layer to strip. The unterminated tail is bounded by `max_bytes`.
#[derive(Debug)]
pub struct LineFrameBuffer {
    pending: Vec<u8>,
    max_bytes: usize,
}

impl LineFrameBuffer {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_bytes,
        }
    }

    /// Append `chunk` and return every line it completed, in order.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::LineOverflow`] when the bytes held back after
    /// the last newline exceed the limit.
    pub fn extract_complete_lines(
        &mut self,
        chunk: &[u8],
    ) -> Result<SmallVec<[String; 4]>, BridgeError> {
        let mut lines = SmallVec::new();
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = memrchr(b'\n', &self.pending) else {
            self.check_pending()?;
            return Ok(lines);
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        let mut start = 0usize;
        for pos in memchr_iter(b'\n', &complete) {
            lines.push(String::from_utf8_lossy(&complete[start..pos]).into_owned());
            start = pos + 1;
        }
        self.check_pending()?;
        Ok(lines)
    }

    fn check_pending(&self) -> Result<(), BridgeError> {
        if self.pending.len() <= self.max_bytes {
            return Ok(());
        }
        Err(BridgeError::LineOverflow {
            limit: self.max_bytes,
            buffered: preview(&String::from_utf8_lossy(&self.pending)),
        })
    }

    /// Drain the unterminated fragment, if any. Used once at end of input.
    pub fn take_remaining(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}

/// Split a `data:` payload that carries several coalesced entries.
///
/// Some backends occasionally glue frames together without the blank-line
/// separator, producing `{...}data: {...}data: [DONE]` on a single line. Each
/// leading JSON value directly followed by another `data:` marker is peeled
/// off; whatever is left (possibly truncated) is returned last.
#[must_use]
pub fn split_data_entries(payload: &str) -> SmallVec<[&str; 2]> {
    let mut entries = SmallVec::new();
    let mut rest = payload;

    while let Some(end) = leading_value_len(rest) {
        let Some(next) = rest[end..].trim_start().strip_prefix("data:") else {
            break;
        };
        entries.push(&rest[..end]);
        rest = next.strip_prefix(' ').unwrap_or(next);
    }

    entries.push(rest);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1024;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut buf = LineFrameBuffer::new(LIMIT);
        assert!(buf.extract_complete_lines(b"data: {\"a\"").unwrap().is_empty());
        let lines = buf.extract_complete_lines(b":1}\n\ndata: [DO").unwrap();
        assert_eq!(lines.as_slice(), ["data: {\"a\":1}", ""]);
        let lines = buf.extract_complete_lines(b"NE]\n").unwrap();
        assert_eq!(lines.as_slice(), ["data: [DONE]"]);
        assert_eq!(buf.take_remaining(), None);
    }

    #[test]
    fn test_crlf_is_preserved_for_sse_layer() {
        let mut buf = LineFrameBuffer::new(LIMIT);
        let lines = buf.extract_complete_lines(b"data: x\r\n\r\n").unwrap();
        assert_eq!(lines.as_slice(), ["data: x\r", "\r"]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let text = "data: héllo ✓\n";
        let bytes = text.as_bytes();
        let mut buf = LineFrameBuffer::new(LIMIT);
        // Split inside the two-byte 'é'.
        assert!(buf.extract_complete_lines(&bytes[..8]).unwrap().is_empty());
        let lines = buf.extract_complete_lines(&bytes[8..]).unwrap();
        assert_eq!(lines.as_slice(), ["data: héllo ✓"]);
    }

    #[test]
    fn test_lines_plus_remainder_reconstruct_input() {
        let input = "a\nbb\r\n\nccc\nd";
        for split in 0..=input.len() {
            let mut buf = LineFrameBuffer::new(LIMIT);
            let mut rebuilt = String::new();
            for chunk in [&input.as_bytes()[..split], &input.as_bytes()[split..]] {
                for line in buf.extract_complete_lines(chunk).unwrap() {
                    rebuilt.push_str(&line);
                    rebuilt.push('\n');
                }
            }
            rebuilt.push_str(&buf.take_remaining().unwrap_or_default());
            assert_eq!(rebuilt, input, "split at {split}");
        }
    }

    #[test]
    fn test_unterminated_line_past_limit_fails() {
        let mut buf = LineFrameBuffer::new(16);
        let lines = buf.extract_complete_lines(b"data: ok\ndata: 0123456").unwrap();
        assert_eq!(lines.as_slice(), ["data: ok"]);
        let err = buf.extract_complete_lines(b"789abcdef").unwrap_err();
        assert!(matches!(err, BridgeError::LineOverflow { limit: 16, .. }));
    }

    #[test]
    fn test_long_complete_line_is_not_capped() {
        let mut buf = LineFrameBuffer::new(4);
        let lines = buf.extract_complete_lines(b"data: a long line\n").unwrap();
        assert_eq!(lines.as_slice(), ["data: a long line"]);
    }

    #[test]
    fn test_take_remaining_drains() {
        let mut buf = LineFrameBuffer::new(LIMIT);
        buf.extract_complete_lines(b"done\npartial").unwrap();
        assert_eq!(buf.buffered_len(), 7);
        assert_eq!(buf.take_remaining().as_deref(), Some("partial"));
        assert_eq!(buf.take_remaining(), None);
    }

    #[test]
    fn test_split_single_entry() {
        assert_eq!(split_data_entries("{\"a\":1}").as_slice(), ["{\"a\":1}"]);
        assert_eq!(split_data_entries("[DONE]").as_slice(), ["[DONE]"]);
        assert_eq!(split_data_entries("{\"a\":").as_slice(), ["{\"a\":"]);
    }

    #[test]
    fn test_split_coalesced_entries() {
        let line = "{\"a\":\"data: x\"}data: {\"b\":2}data: [DONE]";
        assert_eq!(
            split_data_entries(line).as_slice(),
            ["{\"a\":\"data: x\"}", "{\"b\":2}", "[DONE]"]
        );
    }

    #[test]
    fn test_split_keeps_truncated_tail() {
        let line = "{\"a\":1}data: {\"b\":";
        assert_eq!(split_data_entries(line).as_slice(), ["{\"a\":1}", "{\"b\":"]);
    }
}
