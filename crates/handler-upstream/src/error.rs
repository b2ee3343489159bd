use grpc_web_codec::Status;
use thiserror::Error;

/// Result type alias for upstream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The upstream address is not an absolute `http://host:port` URI.
    #[error("invalid upstream address: {0}")]
    InvalidUri(String),

    /// The outbound request could not be assembled.
    #[error("failed to build upstream request: {0}")]
    Request(#[from] http::Error),

    /// The backend could not be reached, or went away before answering.
    #[error("upstream unavailable: {0}")]
    BackendUnavailable(#[from] hyper_util::client::legacy::Error),
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidUri(_) | Error::Request(_) => Self::internal(err.to_string()),
            Error::BackendUnavailable(_) => Self::unavailable(err.to_string()),
        }
    }
}
