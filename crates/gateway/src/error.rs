use crate::state::{CallEvent, CallState};

use grpc_web_codec::Status;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The server has already been started.
    #[error("The server has already been started")]
    AlreadyStarted,

    /// Failed to bind to address.
    #[error("Failed to bind to address: {0}")]
    Bind(#[source] std::io::Error),

    /// A service or method was registered twice.
    #[error("duplicate registration for {0}")]
    DuplicateRegistration(String),

    /// A service or method name cannot appear in a call path.
    #[error("invalid registration name: {0:?}")]
    InvalidName(String),

    /// No handler is registered for the call.
    #[error("no handler registered for /{service}/{method}")]
    NotFound {
        /// Requested service.
        service: String,
        /// Requested method.
        method: String,
    },

    /// An event arrived that the call's current state does not allow.
    #[error("invalid transition: {event:?} in state {state:?}")]
    InvalidTransition {
        /// State of the call when the event arrived.
        state: CallState,
        /// The rejected event.
        event: CallEvent,
    },
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { .. } => Self::not_found(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}
