//! Error types for the frame codec.

use std::io;

use crate::status::Status;

use thiserror::Error;

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors raised while encoding or decoding gRPC-Web frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The flag byte does not name a known frame kind.
    #[error("unknown frame flag: {0:#04x}")]
    UnknownFlag(u8),

    /// Declared frame length exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    TooLarge {
        /// Size declared by the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Input ended in the middle of a frame.
    #[error("stream ended with {remaining} bytes of an incomplete frame")]
    Truncated {
        /// Bytes buffered when the input ended.
        remaining: usize,
    },

    /// A trailer frame payload is not a valid header block.
    #[error("invalid trailer block: {0}")]
    InvalidTrailer(String),

    /// The base64 body of a text-mode call could not be decoded.
    #[error("invalid base64 body: {0}")]
    InvalidBase64(String),

    /// Reading the underlying byte stream failed.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl FrameError {
    /// Whether the error was caused by a frame exceeding the size limit.
    #[must_use]
    pub const fn is_too_large(&self) -> bool {
        matches!(self, Self::TooLarge { .. })
    }
}

// Codec errors travel through `io::Error` when they cross an `AsyncRead`
// boundary, so unwrap them on the way back.
impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            return Self::Io(err);
        }

        match err.into_inner().map(|inner| inner.downcast::<Self>()) {
            Some(Ok(frame_error)) => *frame_error,
            Some(Err(inner)) => Self::Io(io::Error::other(inner)),
            None => Self::Io(io::ErrorKind::InvalidData.into()),
        }
    }
}

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(inner) => inner,
            other => Self::new(io::ErrorKind::InvalidData, other),
        }
    }
}

// Framing problems end the call; only the size limit has its own code.
impl From<FrameError> for Status {
    fn from(err: FrameError) -> Self {
        if err.is_too_large() {
            Self::resource_exhausted(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    #[test]
    fn test_status_mapping() {
        let status = Status::from(FrameError::TooLarge { size: 10, max: 5 });
        assert_eq!(status.code(), Code::ResourceExhausted);

        let status = Status::from(FrameError::UnknownFlag(0x42));
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "unknown frame flag: 0x42");
    }

    #[test]
    fn test_io_round_trip_preserves_variant() {
        let err: io::Error = FrameError::UnknownFlag(0x42).into();
        let back = FrameError::from(err);

        assert!(matches!(back, FrameError::UnknownFlag(0x42)));
    }

    #[test]
    fn test_plain_io_error_is_wrapped() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");

        assert!(matches!(FrameError::from(err), FrameError::Io(_)));
    }
}
