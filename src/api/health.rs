use std::sync::Arc;

use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(state: &Arc<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "msgbridge is running",
        "config": {
            "backend": state.transport.chat_url().as_str(),
            "stream": {
                "tool_arguments": config.stream.tool_arguments,
                "recovery_max_bytes": config.stream.recovery_max_bytes,
                "recovery_max_age_ms": config.stream.recovery_max_age_ms,
                "max_line_bytes": config.stream.max_line_bytes,
            },
            "features": {
                "log_level": config.features.log_level,
                "log_format": config.features.log_format,
            }
        }
    }))
}
