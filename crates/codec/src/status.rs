//! gRPC status codes and the terminal status of a call.

use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Header carrying the numeric status code.
pub const GRPC_STATUS: HeaderName = HeaderName::from_static("grpc-status");

/// Header carrying the percent-encoded status message.
pub const GRPC_MESSAGE: HeaderName = HeaderName::from_static("grpc-message");

// Everything outside printable ASCII, plus '%' itself.
const GRPC_MESSAGE_ENCODE_SET: &AsciiSet = &CONTROLS.add(b'%');

/// gRPC status codes.
///
/// See <https://grpc.github.io/grpc/core/md_doc_statuscodes.html>.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Code {
    /// Not an error; returned on success.
    Ok = 0,
    /// The operation was cancelled, typically by the caller.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// The entity that a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission.
    PermissionDenied = 7,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented or supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request does not have valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Map a wire value to a code. Values outside the known range become
    /// [`Code::Unknown`].
    #[must_use]
    pub const fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// The numeric wire value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Human readable name, as used in gRPC documentation.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_i32())
    }
}

/// The terminal status of a call: a code, a message, and any trailing
/// metadata the handler attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: String,
    metadata: HeaderMap,
}

impl Status {
    /// Create a status with the given code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: HeaderMap::new(),
        }
    }

    /// A successful status with no message.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    /// The call was cancelled by the caller.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// The deadline expired.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Entity not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// A resource limit was hit.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    /// The backend is unreachable or went away.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Operation not implemented.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// Unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    /// Attach trailing metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// The status code.
    #[must_use]
    pub const fn code(&self) -> Code {
        self.code
    }

    /// The status message (decoded).
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Trailing metadata, excluding the status headers themselves.
    #[must_use]
    pub const fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Returns `true` if the code is [`Code::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Render the status as a trailer header block.
    #[must_use]
    pub fn to_trailers(&self) -> HeaderMap {
        let mut trailers = HeaderMap::with_capacity(self.metadata.len() + 2);
        trailers.insert(GRPC_STATUS, HeaderValue::from(self.code.as_i32()));

        if !self.message.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&encode_message(&self.message)) {
                trailers.insert(GRPC_MESSAGE, value);
            }
        }

        for (name, value) in &self.metadata {
            if name != GRPC_STATUS && name != GRPC_MESSAGE {
                trailers.append(name.clone(), value.clone());
            }
        }

        trailers
    }

    /// Read a status from trailers (or the headers of a trailers-only
    /// response). A missing or unparsable `grpc-status` yields
    /// [`Code::Unknown`].
    #[must_use]
    pub fn from_trailers(trailers: &HeaderMap) -> Self {
        let code = trailers
            .get(GRPC_STATUS)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i32>().ok());

        let message = trailers
            .get(GRPC_MESSAGE)
            .and_then(|value| value.to_str().ok())
            .map(|value| percent_decode_str(value).decode_utf8_lossy().into_owned());

        let mut metadata = trailers.clone();
        metadata.remove(GRPC_STATUS);
        metadata.remove(GRPC_MESSAGE);

        let status = match code {
            Some(code) => Self::new(Code::from_i32(code), message.unwrap_or_default()),
            None => Self::unknown(
                message.unwrap_or_else(|| "missing grpc-status in trailers".to_string()),
            ),
        };

        status.with_metadata(metadata)
    }

    /// Map a non-200 HTTP status from an upstream to a gRPC status.
    #[must_use]
    pub fn from_http_status(status: StatusCode) -> Self {
        let code = match status {
            StatusCode::BAD_REQUEST => Code::Internal,
            StatusCode::UNAUTHORIZED => Code::Unauthenticated,
            StatusCode::FORBIDDEN => Code::PermissionDenied,
            StatusCode::NOT_FOUND => Code::Unimplemented,
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => Code::Unavailable,
            _ => Code::Unknown,
        };

        Self::new(code, format!("upstream responded with HTTP {status}"))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for Status {}

/// Percent-encode a status message. Spaces at either end are escaped too,
/// since header values lose surrounding whitespace when parsed.
fn encode_message(message: &str) -> String {
    let encoded = utf8_percent_encode(message, GRPC_MESSAGE_ENCODE_SET).to_string();

    let inner = encoded.trim_matches(' ');
    if inner.is_empty() {
        return "%20".repeat(encoded.len());
    }

    let leading = encoded.len() - encoded.trim_start_matches(' ').len();
    let trailing = encoded.len() - encoded.trim_end_matches(' ').len();

    format!("{}{inner}{}", "%20".repeat(leading), "%20".repeat(trailing))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wire_values() {
        assert_eq!(Code::Ok.as_i32(), 0);
        assert_eq!(Code::NotFound.as_i32(), 5);
        assert_eq!(Code::Unavailable.as_i32(), 14);
        assert_eq!(Code::from_i32(4), Code::DeadlineExceeded);
        assert_eq!(Code::from_i32(99), Code::Unknown);
    }

    #[test]
    fn test_message_is_percent_encoded() {
        let status = Status::internal("50% done\nnot ok ✓");
        let trailers = status.to_trailers();

        assert_eq!(trailers[GRPC_STATUS], "13");
        assert_eq!(
            trailers[GRPC_MESSAGE],
            "50%25 done%0Anot ok %E2%9C%93"
        );
        assert_eq!(Status::from_trailers(&trailers), status);
    }

    #[test]
    fn test_surrounding_spaces_survive_trailer_frame() {
        for message in ["  padded ", " ", "inner space kept"] {
            let status = Status::internal(message);

            let payload = crate::trailers::encode(&status.to_trailers());
            let decoded = crate::trailers::decode(&payload).unwrap();

            assert_eq!(Status::from_trailers(&decoded).message(), message);
        }

        assert_eq!(
            Status::internal(" a b ").to_trailers()[GRPC_MESSAGE],
            "%20a b%20"
        );
    }

    #[test]
    fn test_metadata_survives_trailers() {
        let mut metadata = HeaderMap::new();
        metadata.insert("x-request-cost", HeaderValue::from_static("12"));
        let status = Status::ok().with_metadata(metadata);

        let trailers = status.to_trailers();
        assert_eq!(trailers["x-request-cost"], "12");

        let parsed = Status::from_trailers(&trailers);
        assert!(parsed.is_ok());
        assert_eq!(parsed.metadata()["x-request-cost"], "12");
        assert!(parsed.metadata().get(GRPC_STATUS).is_none());
    }

    #[test]
    fn test_missing_status_is_unknown() {
        let status = Status::from_trailers(&HeaderMap::new());

        assert_eq!(status.code(), Code::Unknown);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Status::from_http_status(StatusCode::NOT_FOUND).code(),
            Code::Unimplemented
        );
        assert_eq!(
            Status::from_http_status(StatusCode::SERVICE_UNAVAILABLE).code(),
            Code::Unavailable
        );
        assert_eq!(
            Status::from_http_status(StatusCode::IM_A_TEAPOT).code(),
            Code::Unknown
        );
    }
}
