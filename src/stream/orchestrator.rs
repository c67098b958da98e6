use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::{StreamConfig, ToolArgumentsMode};
use crate::error::BridgeError;
use crate::json_scan::{classify_json_payload, JsonShape};
use crate::protocol::anthropic::AnthropicStreamEvent;
use crate::protocol::openai_chat::OpenAiStreamChunk;
use crate::stream::accumulator::{BackendDelta, ContentAccumulator, StreamSummary};
use crate::stream::emitter::EventEmitter;
use crate::stream::frame::{split_data_entries, LineFrameBuffer};
use crate::stream::recovery::{preview, JsonRecoveryBuffer, RecoveryProgress};
use crate::stream::sink::EventSink;
use crate::stream::sse::{classify_line, is_done_payload, SseLine};
use crate::stream::state::{StreamState, StreamStateMachine};

/// Per-request engine limits, derived from the `stream` config section.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub recovery_max_bytes: usize,
    pub recovery_max_age: Duration,
    pub max_line_bytes: usize,
    pub tool_arguments: ToolArgumentsMode,
}

impl From<&StreamConfig> for StreamSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            recovery_max_bytes: config.recovery_max_bytes,
            recovery_max_age: config.recovery_max_age(),
            max_line_bytes: config.max_line_bytes,
            tool_arguments: config.tool_arguments,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

enum Flow {
    Continue,
    Finished(StreamSummary),
}

/// Reader loop turning one chat-completions SSE body into messages-API events.
///
/// Owns every piece of per-request state. Events produced for one chunk are
/// fully written before the next chunk is pulled.
pub struct StreamOrchestrator<S> {
    machine: StreamStateMachine,
    frames: LineFrameBuffer,
    recovery: JsonRecoveryBuffer,
    accumulator: ContentAccumulator,
    emitter: EventEmitter<S>,
    pending: Vec<AnthropicStreamEvent>,
}

impl<S: EventSink> StreamOrchestrator<S> {
    #[must_use]
    pub fn new(
        sink: S,
        model: impl Into<String>,
        message_id: impl Into<String>,
        settings: &StreamSettings,
    ) -> Self {
        Self {
            machine: StreamStateMachine::new(),
            frames: LineFrameBuffer::new(settings.max_line_bytes),
            recovery: JsonRecoveryBuffer::new(
                settings.recovery_max_bytes,
                settings.recovery_max_age,
            ),
            accumulator: ContentAccumulator::new(settings.tool_arguments),
            emitter: EventEmitter::new(sink, model, message_id),
            pending: Vec::with_capacity(4),
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.machine.state()
    }

    /// Whether the success status and SSE headers were committed.
    #[must_use]
    pub fn headers_sent(&self) -> bool {
        self.emitter.sink().is_open()
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        self.emitter.sink()
    }

    pub fn into_sink(self) -> S {
        self.emitter.into_sink()
    }

    /// Consume the backend body until the end-of-stream sentinel.
    ///
    /// On success the sink has been closed after `message_stop`. On failure the
    /// machine is in `Error`, a context snapshot has been logged and the sink
    /// is left for [`Self::report_error`].
    ///
    /// # Errors
    ///
    /// Any fatal stream condition: backend-reported error, malformed payload,
    /// recovery overflow or expiry, body ending before the sentinel, body read
    /// failure, or the client going away.
    pub async fn run<B, E>(&mut self, body: B) -> Result<StreamSummary, BridgeError>
    where
        B: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        match self.read_loop(body).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                let state = self.machine.state();
                self.machine.fail();
                self.log_failure(state, &err);
                Err(err)
            }
        }
    }

    /// Surface a fatal error to the client and close the response.
    ///
    /// Writes an `error` event only if headers were already sent; otherwise
    /// the caller answers with a plain HTTP error instead.
    pub async fn report_error(&mut self, err: &BridgeError) {
        if self.emitter.sink().is_closed() {
            return;
        }
        if self.headers_sent() && !matches!(err, BridgeError::DownstreamClosed) {
            if let Err(write_err) = self.emitter.error(err).await {
                debug!(error = %write_err, "failed to write error event");
            }
        }
        self.emitter.sink_mut().close();
    }

    async fn read_loop<B, E>(&mut self, body: B) -> Result<StreamSummary, BridgeError>
    where
        B: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut body = std::pin::pin!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                BridgeError::Transport(format!("backend stream read failed: {e}"))
            })?;
            for line in self.frames.extract_complete_lines(&chunk)? {
                if let Flow::Finished(summary) = self.process_line(&line).await? {
                    self.discard_after_sentinel();
                    return Ok(summary);
                }
            }
        }

        if let Some(rest) = self.frames.take_remaining() {
            if let Flow::Finished(summary) = self.process_line(&rest).await? {
                return Ok(summary);
            }
        }

        let buffered = self.recovery.take();
        warn!(
            state = %self.machine.state(),
            recovery_bytes = buffered.len(),
            "backend stream ended without end-of-stream sentinel"
        );
        Err(BridgeError::TruncatedStream {
            buffered: preview(&buffered),
        })
    }

    async fn process_line(&mut self, line: &str) -> Result<Flow, BridgeError> {
        match classify_line(line) {
            SseLine::Blank | SseLine::Comment | SseLine::Field => Ok(Flow::Continue),
            SseLine::Raw(text) => {
                if self.recovery.is_active() {
                    self.feed_recovery(text).await
                } else {
                    debug!(bytes = text.len(), "ignoring non-data line");
                    Ok(Flow::Continue)
                }
            }
            SseLine::Data(payload) => {
                for entry in split_data_entries(payload) {
                    if let Flow::Finished(summary) = self.process_payload(entry).await? {
                        return Ok(Flow::Finished(summary));
                    }
                }
                Ok(Flow::Continue)
            }
        }
    }

    async fn process_payload(&mut self, payload: &str) -> Result<Flow, BridgeError> {
        if is_done_payload(payload) {
            if self.recovery.is_active() {
                let abandoned = self.recovery.take();
                warn!(
                    bytes = abandoned.len(),
                    preview = %preview(&abandoned),
                    "end-of-stream sentinel during json recovery; buffered fragment abandoned"
                );
            }
            return self.finalize().await.map(Flow::Finished);
        }

        if self.recovery.is_active() {
            return self.feed_recovery(payload).await;
        }
        if payload.trim().is_empty() {
            return Ok(Flow::Continue);
        }

        match serde_json::from_str::<OpenAiStreamChunk>(payload) {
            Ok(chunk) => self.dispatch(chunk).await,
            Err(err) => match classify_json_payload(payload) {
                JsonShape::Truncated => {
                    debug!(bytes = payload.len(), "payload looks truncated; buffering");
                    self.recovery.begin(payload)?;
                    Ok(Flow::Continue)
                }
                JsonShape::Complete | JsonShape::Malformed => Err(BridgeError::MalformedPayload {
                    message: err.to_string(),
                    payload: preview(payload),
                }),
            },
        }
    }

    async fn feed_recovery(&mut self, fragment: &str) -> Result<Flow, BridgeError> {
        match self.recovery.append(fragment)? {
            RecoveryProgress::Pending => Ok(Flow::Continue),
            RecoveryProgress::Recovered(json) => {
                let chunk = serde_json::from_str::<OpenAiStreamChunk>(&json).map_err(|e| {
                    BridgeError::MalformedPayload {
                        message: e.to_string(),
                        payload: preview(&json),
                    }
                })?;
                self.dispatch(chunk).await
            }
        }
    }

    async fn dispatch(&mut self, chunk: OpenAiStreamChunk) -> Result<Flow, BridgeError> {
        if let Some(error) = chunk.error {
            return Err(BridgeError::BackendReported {
                message: backend_error_message(&error),
                context: self.accumulator.diagnostic_context(),
            });
        }
        if let Some(usage) = chunk.usage {
            self.accumulator.record_usage(usage);
        }
        self.ensure_started().await?;

        if let Some(choice) = chunk.choices.into_iter().next() {
            self.accumulator
                .apply_into(BackendDelta::from(choice.delta), &mut self.pending);
            self.flush_pending().await?;
        }
        Ok(Flow::Continue)
    }

    async fn ensure_started(&mut self) -> Result<(), BridgeError> {
        if !self.machine.begin_streaming() {
            return Ok(());
        }
        self.emitter.sink_mut().open()?;
        let input_tokens = self.accumulator.reported_input_tokens();
        self.emitter.message_start(input_tokens).await?;
        self.emitter.ping().await
    }

    async fn flush_pending(&mut self) -> Result<(), BridgeError> {
        for event in self.pending.drain(..) {
            self.emitter.emit(&event).await?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<StreamSummary, BridgeError> {
        self.ensure_started().await?;
        self.machine.begin_finalizing()?;

        let summary = self.accumulator.finish_into(&mut self.pending);
        self.flush_pending().await?;
        self.emitter
            .message_delta(summary.stop_reason, summary.usage)
            .await?;
        self.emitter.message_stop().await?;

        self.machine.complete()?;
        self.emitter.sink_mut().close();
        debug!(
            stop_reason = summary.stop_reason.as_str(),
            output_tokens = summary.usage.output_tokens,
            "stream finalized"
        );
        Ok(summary)
    }

    fn discard_after_sentinel(&mut self) {
        if let Some(rest) = self.frames.take_remaining() {
            debug!(bytes = rest.len(), "ignoring data after end-of-stream sentinel");
        }
    }

    fn log_failure(&self, state: StreamState, err: &BridgeError) {
        let tool_args = format!("{:?}", self.accumulator.tool_argument_lengths());
        let answer = self.accumulator.answer_text();
        let reasoning = self.accumulator.reasoning_text();
        if matches!(err, BridgeError::DownstreamClosed) {
            warn!(
                state = %state,
                answer_bytes = answer.len(),
                reasoning_bytes = reasoning.len(),
                tool_args = %tool_args,
                "client disconnected; stopped reading backend stream"
            );
            return;
        }
        error!(
            error = %err,
            state = %state,
            headers_sent = self.headers_sent(),
            answer_bytes = answer.len(),
            answer_preview = %preview(answer),
            reasoning_bytes = reasoning.len(),
            reasoning_preview = %preview(reasoning),
            tool_args = %tool_args,
            recovery_bytes = self.recovery.len(),
            recovery_preview = %self.recovery.preview(),
            "stream failed"
        );
    }
}

fn backend_error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => error.to_string(),
        },
        other => other.to_string(),
    }
}
