use std::fmt;

use http::HeaderMap;
use tokio::time::Instant;
use uuid::Uuid;

/// How many messages flow in each direction of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallMode {
    /// One request, one response.
    Unary,

    /// One request, any number of responses.
    ServerStreaming,

    /// Any number of requests, one response.
    ClientStreaming,

    /// Any number of messages in both directions.
    BidiStreaming,
}

impl CallMode {
    /// Whether the client may send more than one message.
    #[must_use]
    pub const fn streams_requests(self) -> bool {
        matches!(self, Self::ClientStreaming | Self::BidiStreaming)
    }

    /// Whether the handler may send more than one message.
    #[must_use]
    pub const fn streams_responses(self) -> bool {
        matches!(self, Self::ServerStreaming | Self::BidiStreaming)
    }
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary => write!(f, "unary"),
            Self::ServerStreaming => write!(f, "server-streaming"),
            Self::ClientStreaming => write!(f, "client-streaming"),
            Self::BidiStreaming => write!(f, "bidi-streaming"),
        }
    }
}

/// Everything a handler may know about a call besides its messages.
#[derive(Clone, Debug)]
pub struct CallContext {
    id: Uuid,
    service: String,
    method: String,
    mode: CallMode,
    metadata: HeaderMap,
    deadline: Option<Instant>,
    subtype: Option<String>,
}

impl CallContext {
    /// Creates a context for a new call with a fresh id.
    pub fn new(service: impl Into<String>, method: impl Into<String>, mode: CallMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            method: method.into(),
            mode,
            metadata: HeaderMap::new(),
            deadline: None,
            subtype: None,
        }
    }

    /// Attach the client's application metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach the instant after which the call is abandoned.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Attach the message subtype from the content type (`proto`, `json`).
    #[must_use]
    pub fn with_subtype(mut self, subtype: Option<String>) -> Self {
        self.subtype = subtype;
        self
    }

    /// Unique id of the call, used to correlate logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Fully qualified service name, e.g. `demo.Weather`.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name within the service.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The call's path, `/service/method`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    /// Call mode the method was registered with.
    #[must_use]
    pub const fn mode(&self) -> CallMode {
        self.mode
    }

    /// Application metadata sent by the client.
    #[must_use]
    pub const fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Deadline of the call, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Message subtype named by the client's content type.
    #[must_use]
    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }
}
