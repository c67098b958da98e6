use std::fmt;

use crate::error::BridgeError;

/// Lifecycle of one outgoing event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Initializing,
    Streaming,
    Finalizing,
    Completed,
    Error,
}

impl StreamState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Initializing => "initializing",
            StreamState::Streaming => "streaming",
            StreamState::Finalizing => "finalizing",
            StreamState::Completed => "completed",
            StreamState::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Error)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Initializing -> Streaming -> Finalizing -> Completed`, with `Error`
/// reachable from every non-terminal state. Holds no business data.
#[derive(Debug)]
pub struct StreamStateMachine {
    state: StreamState,
}

impl StreamStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StreamState::Initializing,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `Initializing -> Streaming`.
    ///
    /// Returns `true` only for the call that performed the transition, so
    /// callers can gate one-time side effects on it. Every later call is a
    /// no-op returning `false`.
    pub fn begin_streaming(&mut self) -> bool {
        if self.state == StreamState::Initializing {
            self.state = StreamState::Streaming;
            true
        } else {
            false
        }
    }

    /// `Streaming -> Finalizing`, taken on the end-of-stream sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidTransition`] from any other state.
    pub fn begin_finalizing(&mut self) -> Result<(), BridgeError> {
        self.transition(StreamState::Streaming, StreamState::Finalizing)
    }

    /// `Finalizing -> Completed`, taken after every closing event was written.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidTransition`] from any other state.
    pub fn complete(&mut self) -> Result<(), BridgeError> {
        self.transition(StreamState::Finalizing, StreamState::Completed)
    }

    /// Move to `Error`. Returns `false` if the machine was already terminal.
    pub fn fail(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = StreamState::Error;
        true
    }

    fn transition(&mut self, from: StreamState, to: StreamState) -> Result<(), BridgeError> {
        if self.state != from {
            return Err(BridgeError::InvalidTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for StreamStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
