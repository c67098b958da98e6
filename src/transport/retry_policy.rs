use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;

pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 2;
const RETRY_BACKOFF_BASE_MS: u64 = 100;
const RETRY_BACKOFF_MAX_MS: u64 = 1_000;
const RETRY_AFTER_MAX_SECS: u64 = 30;
const RETRY_TRANSPORT_FAST_SECOND_MS: u64 = 10;

const TRANSIENT_TRANSPORT_NEEDLES: [&[u8]; 9] = [
    b"timed out",
    b"timeout",
    b"connection reset",
    b"connection aborted",
    b"broken pipe",
    b"http2 error",
    b"connection refused",
    b"unexpected eof",
    b"stream closed",
];

// Dropped connections are usually stale pooled sockets; a fresh one works at once.
const STALE_CONNECTION_NEEDLES: [&[u8]; 6] = [
    b"connection reset",
    b"connection aborted",
    b"broken pipe",
    b"http2 error",
    b"unexpected eof",
    b"stream closed",
];

/// Delay before retrying a response with `status`, or `None` if it is final.
///
/// `attempt` counts retries already made.
pub(crate) fn status_retry_delay(
    status: http::StatusCode,
    headers: &http::HeaderMap,
    attempt: u32,
) -> Option<Duration> {
    if attempt >= RETRY_MAX_ATTEMPTS || !matches!(status.as_u16(), 429 | 503 | 529) {
        return None;
    }
    Some(parse_retry_after_delay(headers).unwrap_or_else(|| backoff_delay(attempt)))
}

/// Delay before retrying after a transport error `message`, or `None` if the
/// error is not transient or the retry budget is spent.
pub(crate) fn transport_retry_delay(message: &str, attempt: u32) -> Option<Duration> {
    let haystack = message.as_bytes();
    if attempt >= RETRY_MAX_ATTEMPTS || !contains_any(haystack, &TRANSIENT_TRANSPORT_NEEDLES) {
        return None;
    }
    if contains_any(haystack, &STALE_CONNECTION_NEEDLES) {
        return Some(if attempt == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(RETRY_TRANSPORT_FAST_SECOND_MS)
        });
    }
    Some(backoff_delay(attempt))
}

fn contains_any(haystack: &[u8], needles: &[&[u8]]) -> bool {
    needles
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

fn contains_ascii_case_insensitive(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

fn backoff_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.min(10);
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(multiplier)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}

/// `Retry-After` as delta-seconds or HTTP date, capped.
fn parse_retry_after_delay(headers: &http::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    let cap = Duration::from_secs(RETRY_AFTER_MAX_SECS);

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(cap));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(cap))
}
