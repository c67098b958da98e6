pub mod token_counter;

use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::config::{FeaturesConfig, LogFormat};
use crate::protocol::anthropic::AnthropicUsage;

/// `EnvFilter` directive for a configured log level, or `None` when logging
/// is disabled. `WARNING` and `CRITICAL` are accepted aliases.
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<&'static str> {
    match log_level.to_uppercase().as_str() {
        "DISABLED" => None,
        "DEBUG" => Some("debug"),
        "WARN" | "WARNING" => Some("warn"),
        "ERROR" | "CRITICAL" => Some("error"),
        _ => Some("info"),
    }
}

/// Install the global subscriber from the `features` config section.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_tracing(features: &FeaturesConfig) {
    let Some(directive) = filter_directive(&features.log_level) else {
        return;
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);
    match features.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().with_current_span(true).init(),
    }
}

/// Log usage for a finished request, measured from `started`.
pub fn log_request_complete(model: &str, usage: &AnthropicUsage, started: Instant) {
    token_counter::log_request_usage(model, usage, started.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_aliases() {
        assert_eq!(filter_directive("disabled"), None);
        assert_eq!(filter_directive("WARNING"), Some("warn"));
        assert_eq!(filter_directive("critical"), Some("error"));
        assert_eq!(filter_directive("DEBUG"), Some("debug"));
        assert_eq!(filter_directive("INFO"), Some("info"));
    }
}
