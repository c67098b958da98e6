use std::time::Instant;

use axum::body::Body;
use axum::response::Response;
use tracing::Instrument;

use crate::error::BridgeError;
use crate::observability::log_request_complete;
use crate::stream::{body_stream, channel_sink, SseResponseHandle, StreamOrchestrator, StreamSettings};

pub(crate) fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Run the streaming engine over a backend response.
///
/// Resolves once the engine either committed headers (the SSE response is
/// returned and keeps streaming from a background task) or failed before
/// producing output (the error is returned for a plain HTTP error reply).
pub(crate) async fn stream_response(
    upstream: reqwest::Response,
    model: String,
    message_id: String,
    settings: StreamSettings,
    channel_capacity: usize,
    started: Instant,
) -> Result<Response, BridgeError> {
    let (sink, handle) = channel_sink(channel_capacity);
    let SseResponseHandle { head, body } = handle;

    let task = tokio::spawn(
        async move {
            let mut orchestrator = StreamOrchestrator::new(sink, model.as_str(), message_id, &settings);
            match orchestrator.run(upstream.bytes_stream()).await {
                Ok(summary) => {
                    log_request_complete(&model, &summary.usage, started);
                    Ok(())
                }
                Err(err) => {
                    orchestrator.report_error(&err).await;
                    Err(err)
                }
            }
        }
        .in_current_span(),
    );

    if head.await.is_ok() {
        return Ok(sse_ok_response(Body::from_stream(body_stream(body))));
    }

    match task.await {
        Ok(Err(err)) => Err(err),
        Ok(Ok(())) => Err(BridgeError::Internal(
            "stream finished without committing a response".to_string(),
        )),
        Err(join_err) => Err(BridgeError::Internal(format!(
            "stream task failed: {join_err}"
        ))),
    }
}
