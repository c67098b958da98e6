use bytes::Bytes;

use crate::error::{error_type_for_category, BridgeError};
use crate::protocol::anthropic::{
    AnthropicContentBlock, AnthropicDelta, AnthropicDeltaUsage, AnthropicErrorBody,
    AnthropicMessageDeltaBody, AnthropicMessageStart, AnthropicStreamEvent, AnthropicUsage,
};
use crate::protocol::mapping::StopReason;
use crate::stream::sink::EventSink;
use crate::stream::sse::named_sse_frame;

/// Renders messages-API stream events onto an [`EventSink`].
///
/// Each method serializes exactly one event and returns once the sink has
/// accepted it. Nothing is batched or reordered.
#[derive(Debug)]
pub struct EventEmitter<S> {
    sink: S,
    model: String,
    message_id: String,
}

impl<S: EventSink> EventEmitter<S> {
    #[must_use]
    pub fn new(sink: S, model: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            sink,
            model: model.into(),
            message_id: message_id.into(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub async fn message_start(&mut self, input_tokens: u64) -> Result<(), BridgeError> {
        let message = AnthropicMessageStart {
            id: self.message_id.clone(),
            type_: "message".to_string(),
            role: "assistant".to_string(),
            model: self.model.clone(),
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens,
                output_tokens: 0,
            },
        };
        self.emit(&AnthropicStreamEvent::MessageStart { message }).await
    }

    pub async fn ping(&mut self) -> Result<(), BridgeError> {
        self.emit(&AnthropicStreamEvent::Ping {}).await
    }

    pub async fn content_block_start(
        &mut self,
        index: usize,
        content_block: AnthropicContentBlock,
    ) -> Result<(), BridgeError> {
        self.emit(&AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block,
        })
        .await
    }

    pub async fn content_block_delta(
        &mut self,
        index: usize,
        delta: AnthropicDelta,
    ) -> Result<(), BridgeError> {
        self.emit(&AnthropicStreamEvent::ContentBlockDelta { index, delta })
            .await
    }

    pub async fn content_block_stop(&mut self, index: usize) -> Result<(), BridgeError> {
        self.emit(&AnthropicStreamEvent::ContentBlockStop { index })
            .await
    }

    /// `input_tokens` is only included when the backend reported it.
    pub async fn message_delta(
        &mut self,
        stop_reason: StopReason,
        usage: AnthropicUsage,
    ) -> Result<(), BridgeError> {
        self.emit(&AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDeltaBody {
                stop_reason: Some(stop_reason.as_str().to_string()),
                stop_sequence: None,
            },
            usage: AnthropicDeltaUsage {
                input_tokens: (usage.input_tokens > 0).then_some(usage.input_tokens),
                output_tokens: usage.output_tokens,
            },
        })
        .await
    }

    pub async fn message_stop(&mut self) -> Result<(), BridgeError> {
        self.emit(&AnthropicStreamEvent::MessageStop {}).await
    }

    pub async fn error(&mut self, err: &BridgeError) -> Result<(), BridgeError> {
        self.emit(&AnthropicStreamEvent::Error {
            error: AnthropicErrorBody {
                type_: error_type_for_category(err.category()).to_string(),
                message: err.to_string(),
            },
        })
        .await
    }

    /// Serialize and write any event.
    pub async fn emit(&mut self, event: &AnthropicStreamEvent) -> Result<(), BridgeError> {
        let json = serde_json::to_string(event)
            .map_err(|e| BridgeError::Internal(format!("event serialization failed: {e}")))?;
        self.write_and_flush(event.event_name(), &json).await
    }

    /// Write one `event:`/`data:` frame and wait for the sink to take it.
    pub async fn write_and_flush(&mut self, event_name: &str, json: &str) -> Result<(), BridgeError> {
        let frame = named_sse_frame(event_name, json);
        self.sink.write_frame(Bytes::from(frame)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::sink::MemorySink;

    fn opened_emitter() -> EventEmitter<MemorySink> {
        let mut sink = MemorySink::new();
        sink.open().unwrap();
        EventEmitter::new(sink, "claude-x", "msg_0001")
    }

    #[tokio::test]
    async fn test_message_start_shape() {
        let mut emitter = opened_emitter();
        emitter.message_start(0).await.unwrap();
        let events = emitter.sink().events();
        assert_eq!(events[0].0, "message_start");
        let message = &events[0].1["message"];
        assert_eq!(message["id"], "msg_0001");
        assert_eq!(message["type"], "message");
        assert_eq!(message["role"], "assistant");
        assert_eq!(message["model"], "claude-x");
        assert_eq!(message["content"], serde_json::json!([]));
        assert_eq!(message["stop_reason"], serde_json::Value::Null);
        assert_eq!(message["usage"]["output_tokens"], 0);
    }

    #[tokio::test]
    async fn test_frame_format() {
        let mut emitter = opened_emitter();
        emitter.content_block_stop(2).await.unwrap();
        assert_eq!(
            emitter.sink().text(),
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":2}\n\n"
        );
    }

    #[tokio::test]
    async fn test_message_delta_usage() {
        let mut emitter = opened_emitter();
        emitter
            .message_delta(
                StopReason::ToolUse,
                AnthropicUsage {
                    input_tokens: 0,
                    output_tokens: 7,
                },
            )
            .await
            .unwrap();
        let events = emitter.sink().events();
        assert_eq!(events[0].1["delta"]["stop_reason"], "tool_use");
        assert_eq!(events[0].1["usage"], serde_json::json!({"output_tokens": 7}));
    }

    #[tokio::test]
    async fn test_error_event_carries_category_type() {
        let mut emitter = opened_emitter();
        emitter
            .error(&BridgeError::TruncatedStream {
                buffered: String::new(),
            })
            .await
            .unwrap();
        let events = emitter.sink().events();
        assert_eq!(events[0].0, "error");
        assert_eq!(events[0].1["error"]["type"], "api_error");
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let mut sink = MemorySink::failing_after(0);
        sink.open().unwrap();
        let mut emitter = EventEmitter::new(sink, "m", "msg_1");
        assert!(matches!(
            emitter.ping().await,
            Err(BridgeError::DownstreamClosed)
        ));
    }
}
