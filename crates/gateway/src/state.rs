//! Lifecycle of a single call.
//!
//! ```text
//!            Invoke            Reply
//!   Idle ──────────► HeadersSent ──────► Streaming
//!    │                   │                  │
//!    │ Status            │ Status           │ Status
//!    ▼                   ▼                  ▼
//!  HalfClosedLocal ◄─────┴──────────────────┘
//!    │ RequestEnd
//!    ▼
//!  Closed ◄── Status ── HalfClosedRemote ◄── RequestEnd ── Idle / HeadersSent / Streaming
//! ```
//!
//! `Reset` closes a call from any live state when the client goes away.

use crate::error::{Error, Result};

use grpc_web_handler::CallMode;
use uuid::Uuid;

/// State of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Waiting for the first request message.
    Idle,

    /// The handler has been invoked but has not replied yet.
    HeadersSent,

    /// The handler is replying.
    Streaming,

    /// The terminal status has been emitted; the request side is still open.
    HalfClosedLocal,

    /// The client has no more request messages; replies may still flow.
    HalfClosedRemote,

    /// Both directions are complete.
    Closed,
}

/// Something that happened to a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallEvent {
    /// The handler was resolved and started.
    Invoke,

    /// The handler produced metadata or a message.
    Reply,

    /// The request direction finished, either by the client half-closing or
    /// by the driver abandoning it after the status.
    RequestEnd,

    /// The terminal status was emitted.
    Status,

    /// The client went away.
    Reset,
}

/// Bookkeeping for one call, owned by the task driving it.
#[derive(Debug)]
pub struct Call {
    id: Uuid,
    mode: CallMode,
    state: CallState,
    requests: usize,
    responses: usize,
}

impl Call {
    /// Creates a call in the `Idle` state.
    #[must_use]
    pub const fn new(id: Uuid, mode: CallMode) -> Self {
        Self {
            id,
            mode,
            state: CallState::Idle,
            requests: 0,
            responses: 0,
        }
    }

    /// Id of the call.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Mode of the call.
    #[must_use]
    pub const fn mode(&self) -> CallMode {
        self.mode
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> CallState {
        self.state
    }

    /// Whether the call has reached `Closed`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == CallState::Closed
    }

    /// Whether the terminal status has already been emitted.
    #[must_use]
    pub const fn status_sent(&self) -> bool {
        matches!(self.state, CallState::HalfClosedLocal | CallState::Closed)
    }

    /// Number of request messages forwarded to the handler.
    #[must_use]
    pub const fn requests(&self) -> usize {
        self.requests
    }

    /// Number of response messages relayed to the client.
    #[must_use]
    pub const fn responses(&self) -> usize {
        self.responses
    }

    /// Record forwarded request messages.
    pub const fn add_requests(&mut self, count: usize) {
        self.requests += count;
    }

    /// Record a relayed response message.
    pub const fn add_response(&mut self) {
        self.responses += 1;
    }

    /// Apply an event, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the event is not allowed in the
    /// current state. The state is left unchanged.
    pub fn apply(&mut self, event: CallEvent) -> Result<CallState> {
        use CallEvent as E;
        use CallState as S;

        let next = match (self.state, event) {
            (S::Idle, E::Invoke) => S::HeadersSent,

            (S::HeadersSent | S::Streaming, E::Reply) => S::Streaming,
            (S::HalfClosedRemote, E::Reply) => S::HalfClosedRemote,

            (S::Idle | S::HeadersSent | S::Streaming, E::RequestEnd) => S::HalfClosedRemote,
            (S::HalfClosedLocal, E::RequestEnd) => S::Closed,

            (S::Idle | S::HeadersSent | S::Streaming, E::Status) => S::HalfClosedLocal,
            (S::HalfClosedRemote, E::Status) => S::Closed,

            (
                S::Idle | S::HeadersSent | S::Streaming | S::HalfClosedLocal | S::HalfClosedRemote,
                E::Reset,
            ) => S::Closed,

            (state, event) => return Err(Error::InvalidTransition { state, event }),
        };

        self.state = next;
        Ok(next)
    }
}
