//! Streaming engine: chat-completions SSE in, messages-API SSE out.
//!
//! The [`StreamOrchestrator`] owns one request's [`LineFrameBuffer`],
//! [`JsonRecoveryBuffer`], [`StreamStateMachine`], [`ContentAccumulator`] and
//! [`EventEmitter`], and drives them from the backend body.

pub mod accumulator;
pub mod emitter;
pub mod frame;
pub mod orchestrator;
pub mod recovery;
pub mod sink;
pub mod sse;
pub mod state;

pub use accumulator::{BackendDelta, ContentAccumulator, StreamSummary, ToolCallFragment};
pub use emitter::EventEmitter;
pub use frame::{split_data_entries, LineFrameBuffer};
pub use orchestrator::{StreamOrchestrator, StreamSettings};
pub use recovery::{JsonRecoveryBuffer, RecoveryProgress};
pub use sink::{body_stream, channel_sink, ChannelSink, EventSink, MemorySink, SseResponseHandle};
pub use state::{StreamState, StreamStateMachine};
