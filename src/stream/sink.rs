use std::convert::Infallible;
use std::future::Future;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::BridgeError;

/// Outbound side of one streaming response.
///
/// `open` commits the success status and SSE headers and may happen at most
/// once. `write_frame` resolves once the frame has been handed to the
/// transport; a failure means the client is gone.
pub trait EventSink: Send {
    /// # Errors
    ///
    /// Returns [`BridgeError::Internal`] when called twice or after close and
    /// [`BridgeError::DownstreamClosed`] when the client is already gone.
    fn open(&mut self) -> Result<(), BridgeError>;

    fn is_open(&self) -> bool;

    fn write_frame(&mut self, frame: Bytes) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// End the response body. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Sink feeding a bounded channel drained by the HTTP response body.
///
/// The bound gives backpressure: a slow client suspends the reader loop
/// instead of growing memory.
#[derive(Debug)]
pub struct ChannelSink {
    head: Option<oneshot::Sender<()>>,
    body: Option<mpsc::Sender<Bytes>>,
    opened: bool,
}

/// Receiving half handed to the HTTP handler.
#[derive(Debug)]
pub struct SseResponseHandle {
    pub head: oneshot::Receiver<()>,
    pub body: mpsc::Receiver<Bytes>,
}

/// Create a connected sink / response handle pair.
#[must_use]
pub fn channel_sink(capacity: usize) -> (ChannelSink, SseResponseHandle) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
    (
        ChannelSink {
            head: Some(head_tx),
            body: Some(body_tx),
            opened: false,
        },
        SseResponseHandle {
            head: head_rx,
            body: body_rx,
        },
    )
}

impl EventSink for ChannelSink {
    fn open(&mut self) -> Result<(), BridgeError> {
        let Some(head) = self.head.take() else {
            return Err(BridgeError::Internal(
                "response headers already committed".to_string(),
            ));
        };
        head.send(()).map_err(|()| BridgeError::DownstreamClosed)?;
        self.opened = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    fn write_frame(&mut self, frame: Bytes) -> impl Future<Output = Result<(), BridgeError>> + Send {
        async move {
            let sender = match self.body.as_ref() {
                Some(sender) if self.opened => sender,
                _ => {
                    return Err(BridgeError::Internal(
                        "frame written outside an open response".to_string(),
                    ))
                }
            };
            sender
                .send(frame)
                .await
                .map_err(|_| BridgeError::DownstreamClosed)
        }
    }

    fn close(&mut self) {
        self.head = None;
        self.body = None;
    }

    fn is_closed(&self) -> bool {
        self.body.is_none()
    }
}

/// Turn the receiving channel into a response body stream.
pub fn body_stream(
    body: mpsc::Receiver<Bytes>,
) -> impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Send {
    futures_util::stream::unfold(body, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok(frame), rx))
    })
}

/// In-memory sink that records every frame. Used by tests and benches.
#[derive(Debug, Default)]
pub struct MemorySink {
    frames: Vec<Bytes>,
    open_count: usize,
    close_count: usize,
    fail_after: Option<usize>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose client disconnects after accepting `frames` frames.
    #[must_use]
    pub fn failing_after(frames: usize) -> Self {
        Self {
            fail_after: Some(frames),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_count
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.close_count
    }

    /// All frames concatenated as text.
    #[must_use]
    pub fn text(&self) -> String {
        self.frames
            .iter()
            .map(|frame| String::from_utf8_lossy(frame))
            .collect()
    }

    /// Decoded `(event name, data)` pairs in write order.
    ///
    /// Frames that are not `event: X\ndata: Y\n\n` are skipped.
    #[must_use]
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.frames
            .iter()
            .filter_map(|frame| {
                let text = std::str::from_utf8(frame).ok()?;
                let (head, rest) = text.split_once('\n')?;
                let name = head.strip_prefix("event: ")?;
                let data = rest.strip_prefix("data: ")?.trim_end_matches('\n');
                let value = serde_json::from_str(data).ok()?;
                Some((name.to_string(), value))
            })
            .collect()
    }

    /// Event names in write order.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|(name, _)| name).collect()
    }
}

impl EventSink for MemorySink {
    fn open(&mut self) -> Result<(), BridgeError> {
        if self.open_count > 0 {
            return Err(BridgeError::Internal(
                "response headers already committed".to_string(),
            ));
        }
        self.open_count += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open_count > 0
    }

    fn write_frame(&mut self, frame: Bytes) -> impl Future<Output = Result<(), BridgeError>> + Send {
        let result = if self.open_count == 0 || self.close_count > 0 {
            Err(BridgeError::Internal(
                "frame written outside an open response".to_string(),
            ))
        } else if self.fail_after.is_some_and(|limit| self.frames.len() >= limit) {
            Err(BridgeError::DownstreamClosed)
        } else {
            self.frames.push(frame);
            Ok(())
        };
        std::future::ready(result)
    }

    fn close(&mut self) {
        self.close_count += 1;
    }

    fn is_closed(&self) -> bool {
        self.close_count > 0
    }
}
