use serde_json::{json, Value};

/// Error type shared by every layer of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Backend reported error: {message}")]
    BackendReported { message: String, context: String },
    #[error("Malformed stream payload: {message}")]
    MalformedPayload { message: String, payload: String },
    #[error("Recovery buffer exceeded {limit} bytes")]
    RecoveryOverflow { limit: usize, buffered: String },
    #[error("Backend line exceeded {limit} bytes without a newline")]
    LineOverflow { limit: usize, buffered: String },
    #[error("Recovery buffer expired after {age_ms}ms")]
    RecoveryExpired { age_ms: u64, buffered: String },
    #[error("Backend stream ended before completion")]
    TruncatedStream { buffered: String },
    #[error("Client disconnected")]
    DownstreamClosed,
    #[error("Invalid stream state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    Overloaded,
    BadGateway,
    ServerError,
}

/// Map a backend HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 404 | 413 | 422 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        503 | 529 => ErrorCategory::Overloaded,
        500..=599 => ErrorCategory::BadGateway,
        _ => ErrorCategory::ServerError,
    }
}

impl BridgeError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            BridgeError::Upstream { status, .. } => category_from_upstream_status(*status),
            BridgeError::Transport(_)
            | BridgeError::BackendReported { .. }
            | BridgeError::MalformedPayload { .. }
            | BridgeError::RecoveryOverflow { .. }
            | BridgeError::LineOverflow { .. }
            | BridgeError::RecoveryExpired { .. }
            | BridgeError::TruncatedStream { .. } => ErrorCategory::BadGateway,
            BridgeError::Config(_)
            | BridgeError::DownstreamClosed
            | BridgeError::InvalidTransition { .. }
            | BridgeError::Internal(_) => ErrorCategory::ServerError,
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code / error type
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Overloaded => http::StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error `type` string used in messages-API error bodies and `error` frames.
#[must_use]
pub fn error_type_for_category(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Permission => "permission_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::Overloaded => "overloaded_error",
        ErrorCategory::BadGateway | ErrorCategory::ServerError => "api_error",
    }
}

/// Messages-API error payload for a given category and message.
#[must_use]
pub fn error_payload(cat: ErrorCategory, message: &str) -> Value {
    json!({
        "type": "error",
        "error": {
            "type": error_type_for_category(cat),
            "message": message,
        }
    })
}

/// Format an error, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(err: &BridgeError) -> (http::StatusCode, Value) {
    let cat = err.category();
    (http_status_for_category(cat), error_payload(cat, &err.to_string()))
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

impl axum::response::IntoResponse for BridgeError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_categories() {
        assert_eq!(
            category_from_upstream_status(400),
            ErrorCategory::InvalidRequest
        );
        assert_eq!(
            category_from_upstream_status(401),
            ErrorCategory::Authentication
        );
        assert_eq!(category_from_upstream_status(429), ErrorCategory::RateLimit);
        assert_eq!(category_from_upstream_status(529), ErrorCategory::Overloaded);
        assert_eq!(category_from_upstream_status(500), ErrorCategory::BadGateway);
    }

    #[test]
    fn test_format_error_stream_failure_is_bad_gateway() {
        let err = BridgeError::TruncatedStream {
            buffered: String::new(),
        };
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::BAD_GATEWAY);
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "api_error");
    }

    #[test]
    fn test_format_error_invalid_request() {
        let err = BridgeError::InvalidRequest("missing model".to_string());
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["message"], "Invalid request: missing model");
    }
}
