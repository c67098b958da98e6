use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::json_scan::{classify_json_payload, JsonShape};

const PREVIEW_CHARS: usize = 256;

/// Result of feeding one more fragment into an active recovery.
#[derive(Debug, PartialEq, Eq)]
pub enum RecoveryProgress {
    /// Still an incomplete prefix; keep buffering.
    Pending,
    /// The buffer now holds one complete JSON document. Recovery is inactive again.
    Recovered(String),
}

/// Reassembles a JSON payload that the backend split across several lines.
///
/// Fragments are concatenated verbatim. Recovery is bounded both by size and
/// by wall-clock age since the first fragment.
#[derive(Debug)]
pub struct JsonRecoveryBuffer {
    buffer: String,
    started_at: Option<Instant>,
    max_bytes: usize,
    max_age: Duration,
}

impl JsonRecoveryBuffer {
    #[must_use]
    pub fn new(max_bytes: usize, max_age: Duration) -> Self {
        Self {
            buffer: String::new(),
            started_at: None,
            max_bytes,
            max_age,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Start recovery with the first (truncated) payload.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RecoveryOverflow`] if the payload alone exceeds
    /// the size limit.
    pub fn begin(&mut self, payload: &str) -> Result<(), BridgeError> {
        self.buffer.clear();
        self.buffer.push_str(payload);
        self.started_at = Some(Instant::now());
        debug!(buffered = self.buffer.len(), "json recovery started");
        self.check_size()
    }

    /// Append a continuation fragment and re-check completeness.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::MalformedPayload`] if the concatenation can no longer
    ///   become valid JSON.
    /// - [`BridgeError::RecoveryOverflow`] / [`BridgeError::RecoveryExpired`]
    ///   when a bound is exceeded before the document completes.
    pub fn append(&mut self, fragment: &str) -> Result<RecoveryProgress, BridgeError> {
        let Some(started_at) = self.started_at else {
            return Err(BridgeError::Internal(
                "append on inactive recovery buffer".to_string(),
            ));
        };
        self.buffer.push_str(fragment);

        match classify_json_payload(&self.buffer) {
            JsonShape::Complete => {
                let json = self.take();
                debug!(bytes = json.len(), "json recovery completed");
                Ok(RecoveryProgress::Recovered(json))
            }
            JsonShape::Malformed => {
                let buffered = self.take();
                Err(BridgeError::MalformedPayload {
                    message: "recovered payload is not valid JSON".to_string(),
                    payload: preview(&buffered),
                })
            }
            JsonShape::Truncated => {
                self.check_size()?;
                let age = started_at.elapsed();
                if age >= self.max_age {
                    let buffered = self.take();
                    let age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
                    warn!(age_ms, bytes = buffered.len(), "json recovery expired");
                    return Err(BridgeError::RecoveryExpired {
                        age_ms,
                        buffered: preview(&buffered),
                    });
                }
                Ok(RecoveryProgress::Pending)
            }
        }
    }

    /// Deactivate and return whatever was buffered.
    pub fn take(&mut self) -> String {
        self.started_at = None;
        std::mem::take(&mut self.buffer)
    }

    /// Bounded preview of the current buffer for diagnostics.
    #[must_use]
    pub fn preview(&self) -> String {
        preview(&self.buffer)
    }

    fn check_size(&mut self) -> Result<(), BridgeError> {
        if self.buffer.len() <= self.max_bytes {
            return Ok(());
        }
        let buffered = self.take();
        warn!(
            limit = self.max_bytes,
            bytes = buffered.len(),
            "json recovery buffer overflow"
        );
        Err(BridgeError::RecoveryOverflow {
            limit: self.max_bytes,
            buffered: preview(&buffered),
        })
    }
}

pub(crate) fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + 3);
            out.push_str(&text[..cut]);
            out.push_str("...");
            out
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> JsonRecoveryBuffer {
        JsonRecoveryBuffer::new(1024, Duration::from_secs(30))
    }

    #[test]
    fn test_recovers_split_payload() {
        let mut recovery = buffer();
        recovery.begin(r#"{"choices":[{"delta":{"content":"Hel"#).unwrap();
        assert!(recovery.is_active());
        assert_eq!(
            recovery.append(r"lo").unwrap(),
            RecoveryProgress::Pending
        );
        let progress = recovery.append(r#""}}]}"#).unwrap();
        assert_eq!(
            progress,
            RecoveryProgress::Recovered(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#.to_string())
        );
        assert!(!recovery.is_active());
        assert!(recovery.is_empty());
    }

    #[test]
    fn test_malformed_concatenation_fails() {
        let mut recovery = buffer();
        recovery.begin(r#"{"a":"#).unwrap();
        let err = recovery.append("}").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedPayload { .. }));
        assert!(!recovery.is_active());
    }

    #[test]
    fn test_overflow_on_begin_and_append() {
        let mut recovery = JsonRecoveryBuffer::new(8, Duration::from_secs(30));
        let err = recovery.begin(r#"{"abcdefgh":"#).unwrap_err();
        assert!(matches!(err, BridgeError::RecoveryOverflow { limit: 8, .. }));
        assert!(!recovery.is_active());

        recovery.begin(r#"{"a":"#).unwrap();
        let err = recovery.append(r#""bcdefg"#).unwrap_err();
        assert!(matches!(err, BridgeError::RecoveryOverflow { .. }));
    }

    #[test]
    fn test_expiry_with_zero_age_limit() {
        let mut recovery = JsonRecoveryBuffer::new(1024, Duration::ZERO);
        recovery.begin(r#"{"a":"#).unwrap();
        let err = recovery.append("1").unwrap_err();
        assert!(matches!(err, BridgeError::RecoveryExpired { .. }));
        assert!(!recovery.is_active());
    }

    #[test]
    fn test_completion_wins_over_expiry() {
        let mut recovery = JsonRecoveryBuffer::new(1024, Duration::ZERO);
        recovery.begin(r#"{"a":"#).unwrap();
        assert!(matches!(
            recovery.append("1}").unwrap(),
            RecoveryProgress::Recovered(_)
        ));
    }

    #[test]
    fn test_append_requires_active_recovery() {
        let mut recovery = buffer();
        assert!(matches!(
            recovery.append("{}"),
            Err(BridgeError::Internal(_))
        ));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }
}
