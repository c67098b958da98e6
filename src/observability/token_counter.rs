use std::time::Duration;
use tracing::info;

use crate::protocol::anthropic::AnthropicUsage;

/// Estimate output tokens for `text` as its whitespace-separated word count.
///
/// Only used when the backend did not report `completion_tokens`.
#[must_use]
pub fn estimate_output_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Resolve the output token count: backend-reported value first, estimate otherwise.
#[must_use]
pub fn resolve_output_tokens(reported: Option<u64>, answer: &str, reasoning: &str) -> u64 {
    if let Some(reported) = reported {
        return reported;
    }
    let mut combined = String::with_capacity(answer.len() + reasoning.len());
    combined.push_str(answer);
    combined.push_str(reasoning);
    estimate_output_tokens(&combined)
}

/// Log token usage for a completed request.
pub fn log_request_usage(model: &str, usage: &AnthropicUsage, duration: Duration) {
    info!(
        model = model,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        "request complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_output_tokens_counts_words() {
        assert_eq!(estimate_output_tokens(""), 0);
        assert_eq!(estimate_output_tokens("  hello   world \n again "), 3);
    }

    #[test]
    fn test_resolve_prefers_reported_count() {
        assert_eq!(resolve_output_tokens(Some(2), "one two three", ""), 2);
        assert_eq!(resolve_output_tokens(Some(0), "one two three", ""), 0);
    }

    #[test]
    fn test_resolve_estimates_over_concatenation() {
        assert_eq!(resolve_output_tokens(None, "Hello", " world"), 2);
        // No separator is inserted between the two channels.
        assert_eq!(resolve_output_tokens(None, "Hel", "lo"), 1);
    }
}
