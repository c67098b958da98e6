use std::sync::Arc;
use std::time::Instant;

use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tracing::Instrument;

use crate::api::streaming::stream_response;
use crate::error::BridgeError;
use crate::observability::log_request_complete;
use crate::protocol::anthropic::AnthropicRequest;
use crate::protocol::mapping::{anthropic_to_openai_request, openai_to_anthropic_response};
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::state::{AppState, RequestIdentity};
use crate::stream::recovery::preview;

/// `POST /v1/messages`.
pub async fn handler(state: Arc<AppState>, body: Bytes) -> Response {
    let identity = state.next_request();
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(request_id = identity.seq, error = %err, "rejected request body");
            return err.into_response();
        }
    };

    let stream = request.stream.unwrap_or(false);
    let span = tracing::info_span!(
        "request",
        request_id = identity.seq,
        model = %request.model,
        stream
    );
    let result = async move {
        if stream {
            handle_stream(&state, request, identity).await
        } else {
            handle_non_stream(&state, request, identity).await
        }
    }
    .instrument(span)
    .await;

    match result {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "request failed before streaming");
            err.into_response()
        }
    }
}

pub(crate) fn parse_request(body: &[u8]) -> Result<AnthropicRequest, BridgeError> {
    let request: AnthropicRequest = serde_json::from_slice(body)
        .map_err(|e| BridgeError::InvalidRequest(format!("invalid request body: {e}")))?;
    if request.model.trim().is_empty() {
        return Err(BridgeError::InvalidRequest("model is required".to_string()));
    }
    if request.messages.is_empty() {
        return Err(BridgeError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    Ok(request)
}

fn encode_backend_body(request: &AnthropicRequest) -> Result<Bytes, BridgeError> {
    let mapped = anthropic_to_openai_request(request)?;
    serde_json::to_vec(&mapped)
        .map(Bytes::from)
        .map_err(|e| BridgeError::Internal(format!("failed to encode backend request: {e}")))
}

async fn handle_stream(
    state: &AppState,
    request: AnthropicRequest,
    identity: RequestIdentity,
) -> Result<Response, BridgeError> {
    let started = Instant::now();
    let body = encode_backend_body(&request)?;
    let upstream = state.transport.send_chat(body, true).await?;
    stream_response(
        upstream,
        request.model,
        identity.message_id,
        state.stream_settings().clone(),
        state.config.stream.channel_capacity,
        started,
    )
    .await
}

async fn handle_non_stream(
    state: &AppState,
    request: AnthropicRequest,
    identity: RequestIdentity,
) -> Result<Response, BridgeError> {
    let started = Instant::now();
    let body = encode_backend_body(&request)?;
    let upstream = state.transport.send_chat(body, false).await?;
    let raw = upstream
        .bytes()
        .await
        .map_err(|e| BridgeError::Transport(format!("backend response read failed: {e}")))?;

    let parsed = parse_backend_response(&raw)?;
    let response = openai_to_anthropic_response(parsed, &request.model, identity.message_id);
    log_request_complete(&request.model, &response.usage, started);
    Ok(Json(response).into_response())
}

fn parse_backend_response(raw: &[u8]) -> Result<OpenAiChatResponse, BridgeError> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| {
        BridgeError::MalformedPayload {
            message: e.to_string(),
            payload: preview(&String::from_utf8_lossy(raw)),
        }
    })?;
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Err(BridgeError::BackendReported {
            message,
            context: String::new(),
        });
    }
    serde_json::from_value(value).map_err(|e| BridgeError::MalformedPayload {
        message: e.to_string(),
        payload: preview(&String::from_utf8_lossy(raw)),
    })
}
