//! Browser-facing half of the HTTP/1.1 to HTTP/2 bridge.
//!
//! Turns an HTTP request into a [`CallRequest`] and the outbound frames of a
//! call back into an HTTP response. Trailers always travel in the body as
//! the final frame, since browsers cannot read HTTP trailers.

use crate::session::{CallRequest, CallResponse, FrameStream};

use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use grpc_web_codec::metadata::{
    self, ContentType, Encoding, GRPC_TIMEOUT, parse_grpc_timeout, parse_path,
};
use grpc_web_codec::{Frame, FrameCodec, FrameError, Status, text};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

/// Check that a request is a gRPC-Web call, returning its content type or
/// the HTTP response that rejects it.
#[allow(clippy::result_large_err)]
pub fn negotiate(method: &Method, headers: &HeaderMap) -> Result<ContentType, Response> {
    if method != Method::POST {
        let mut response = StatusCode::METHOD_NOT_ALLOWED.into_response();
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("POST, OPTIONS"));
        return Err(response);
    }

    headers
        .get(CONTENT_TYPE)
        .and_then(ContentType::parse)
        .ok_or_else(|| {
            (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "expected a gRPC-Web content type",
            )
                .into_response()
        })
}

/// The instant a call must finish by: the sooner of the gateway's call
/// timeout and the client's `grpc-timeout`.
#[must_use]
pub fn deadline(headers: &HeaderMap, call_timeout: Option<Duration>) -> Option<Instant> {
    let requested = headers.get(GRPC_TIMEOUT).and_then(parse_grpc_timeout);

    let timeout = match (requested, call_timeout) {
        (Some(requested), Some(limit)) => Some(requested.min(limit)),
        (requested, limit) => requested.or(limit),
    };

    timeout.map(|timeout| Instant::now() + timeout)
}

/// Decode a request body into frames, undoing the base64 layer of text
/// calls first.
pub fn request_frames(body: Body, encoding: Encoding, max_message_size: usize) -> FrameStream {
    let bytes: BoxStream<'static, io::Result<Bytes>> = match encoding {
        Encoding::Binary => body
            .into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed(),
        Encoding::Text => text::decode_stream(body.into_data_stream()).boxed(),
    };

    FramedRead::new(
        StreamReader::new(bytes),
        FrameCodec::new().with_max_frame_size(max_message_size),
    )
    .boxed()
}

/// Build the call for a negotiated request.
#[must_use]
pub fn call_request(
    path: &str,
    headers: &HeaderMap,
    content_type: &ContentType,
    deadline: Option<Instant>,
    frames: FrameStream,
) -> CallRequest {
    // Malformed paths resolve to nothing and end as not-found
    let (service, method) = parse_path(path).unwrap_or((path, ""));

    CallRequest {
        service: service.to_string(),
        method: method.to_string(),
        metadata: metadata::request_metadata(headers),
        deadline,
        subtype: content_type.subtype().map(ToString::to_string),
        frames,
    }
}

/// Encode one outbound frame for the wire. Text calls encode every frame
/// as its own padded base64 chunk.
///
/// # Errors
///
/// Returns an error if the frame cannot be encoded.
pub fn encode_frame(frame: Frame, encoding: Encoding) -> Result<Bytes, FrameError> {
    let bytes = frame.encode()?;

    Ok(match encoding {
        Encoding::Binary => bytes,
        Encoding::Text => text::encode(&bytes),
    })
}

/// Stream a call's frames back to the browser.
pub async fn respond(content_type: &ContentType, call: CallResponse) -> Response {
    let CallResponse { head, frames } = call;

    // The driver always sends a head before its first frame
    let Ok(initial_metadata) = head.await else {
        return trailers_only(content_type, &Status::internal("call ended without a response"));
    };

    let encoding = content_type.encoding();
    let body = Body::from_stream(
        ReceiverStream::new(frames).map(move |frame| encode_frame(frame, encoding)),
    );

    with_head(content_type, &initial_metadata, body)
}

/// A response whose body is just the status trailer.
#[must_use]
pub fn trailers_only(content_type: &ContentType, status: &Status) -> Response {
    let body = encode_frame(Frame::trailer(status), content_type.encoding())
        .map_or_else(|_| Body::empty(), Body::from);

    with_head(content_type, &HeaderMap::new(), body)
}

fn with_head(content_type: &ContentType, initial_metadata: &HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);

    let headers = response.headers_mut();
    headers.extend(metadata::response_metadata(initial_metadata));
    headers.insert(CONTENT_TYPE, content_type.header_value());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::TryStreamExt;
    use grpc_web_codec::Code;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[test]
    fn test_negotiation() {
        let content_type =
            negotiate(&Method::POST, &headers("application/grpc-web-text+proto")).unwrap();
        assert_eq!(content_type.encoding(), Encoding::Text);

        let response = negotiate(&Method::GET, &headers("application/grpc-web")).unwrap_err();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = negotiate(&Method::POST, &headers("application/json")).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let response = negotiate(&Method::POST, &HeaderMap::new()).unwrap_err();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_deadline_takes_the_sooner() {
        let mut headers = HeaderMap::new();
        assert!(deadline(&headers, None).is_none());

        headers.insert(GRPC_TIMEOUT, HeaderValue::from_static("1S"));
        let now = Instant::now();

        let client_only = deadline(&headers, None).unwrap();
        assert!(client_only >= now + Duration::from_millis(900));

        let capped = deadline(&headers, Some(Duration::from_millis(10))).unwrap();
        assert!(capped <= Instant::now() + Duration::from_millis(10));
    }

    #[test]
    fn test_malformed_path_has_no_method() {
        let request = call_request(
            "/nothing",
            &HeaderMap::new(),
            &ContentType::binary(None),
            None,
            futures::stream::empty().boxed(),
        );

        assert_eq!(request.service, "/nothing");
        assert_eq!(request.method, "");
    }

    #[tokio::test]
    async fn test_text_body_is_decoded() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&Frame::data(Bytes::from_static(b"abc")).encode().unwrap());
        let body = Body::from(text::encode(&wire));

        let frames: Vec<Frame> = request_frames(body, Encoding::Text, 1024)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(frames, vec![Frame::data(Bytes::from_static(b"abc"))]);
    }

    #[tokio::test]
    async fn test_oversized_request_frame() {
        let wire = Frame::data(Bytes::from(vec![0u8; 64])).encode().unwrap();

        let result: Result<Vec<Frame>, FrameError> =
            request_frames(Body::from(wire), Encoding::Binary, 16)
                .try_collect()
                .await;

        let status = Status::from(result.unwrap_err());
        assert_eq!(status.code(), Code::ResourceExhausted);
    }

    #[test]
    fn test_trailers_only_text() {
        let response = trailers_only(
            &ContentType::text(None),
            &Status::not_found("nothing here"),
        );

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/grpc-web-text"
        );
    }
}
