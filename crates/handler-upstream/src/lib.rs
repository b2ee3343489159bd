//! Forwards gRPC-Web calls to a native gRPC backend over HTTP/2.
//!
//! This is the back half of the HTTP/1.1 to HTTP/2 bridge. Request messages
//! are re-framed onto a streaming HTTP/2 request body, and the backend's
//! headers, messages and trailers are turned back into [`Reply`] items.
//! Backend trailers never leave this crate as transport trailers; they become
//! the call's terminal [`Status`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{Error, Result};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use grpc_web_codec::metadata::{
    GRPC_TIMEOUT, encode_grpc_timeout, is_grpc_content_type, response_metadata,
    upstream_content_type,
};
use grpc_web_codec::{Frame, FrameCodec, GRPC_STATUS, MAX_FRAME_SIZE, Status};
use grpc_web_handler::{CallContext, Handler, Message, Reply, ReplyStream, RequestStream};
use http::header::{CONTENT_TYPE, TE};
use http::uri::{Authority, Scheme};
use http::{HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

type UpstreamBody = UnsyncBoxBody<Bytes, grpc_web_codec::FrameError>;

/// Options for the upstream handler.
#[derive(Clone, Debug)]
pub struct UpstreamHandlerOptions {
    /// Address of the gRPC backend, e.g. `http://127.0.0.1:50051`.
    pub uri: Uri,

    /// How long to wait for a TCP connection to the backend.
    pub connect_timeout: Duration,

    /// Largest message accepted from the backend.
    pub max_message_size: usize,
}

impl Default for UpstreamHandlerOptions {
    fn default() -> Self {
        Self {
            uri: Uri::from_static("http://127.0.0.1:50051"),
            connect_timeout: Duration::from_secs(5),
            max_message_size: MAX_FRAME_SIZE,
        }
    }
}

/// A handler that proxies every call to one HTTP/2 (h2c) backend.
#[derive(Clone)]
pub struct UpstreamHandler {
    client: Client<HttpConnector, UpstreamBody>,
    scheme: Scheme,
    authority: Authority,
    max_message_size: usize,
}

impl UpstreamHandler {
    /// Creates a new `UpstreamHandler`. No connection is made until the first
    /// call.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend address lacks a scheme or authority,
    /// or carries a path or query.
    pub fn new(options: UpstreamHandlerOptions) -> Result<Self> {
        let UpstreamHandlerOptions {
            uri,
            connect_timeout,
            max_message_size,
        } = options;

        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| Error::InvalidUri(format!("missing scheme in {uri}")))?;
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| Error::InvalidUri(format!("missing authority in {uri}")))?;

        // Calls supply their own path
        if uri.path() != "/" || uri.query().is_some() {
            return Err(Error::InvalidUri(format!(
                "path and query are not supported in {uri}"
            )));
        }

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(connect_timeout));

        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(connector);

        Ok(Self {
            client,
            scheme,
            authority,
            max_message_size,
        })
    }

    fn build_request(
        &self,
        context: &CallContext,
        requests: RequestStream,
    ) -> Result<Request<UpstreamBody>> {
        let uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(context.path())
            .build()?;

        let body = StreamBody::new(
            requests.map(|message| Frame::from(message).encode().map(http_body::Frame::data)),
        )
        .boxed_unsync();

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(body)?;

        let headers = request.headers_mut();
        headers.extend(context.metadata().clone());
        headers.insert(CONTENT_TYPE, upstream_content_type(context.subtype()));
        headers.insert(TE, HeaderValue::from_static("trailers"));

        if let Some(deadline) = context.deadline() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            headers.insert(GRPC_TIMEOUT, encode_grpc_timeout(remaining));
        }

        Ok(request)
    }
}

impl fmt::Debug for UpstreamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamHandler")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Handler for UpstreamHandler {
    async fn call(
        &self,
        context: CallContext,
        requests: RequestStream,
    ) -> std::result::Result<ReplyStream, Status> {
        let request = self.build_request(&context, requests)?;
        let client = self.client.clone();
        let max_message_size = self.max_message_size;
        let call_id = context.id();

        debug!(%call_id, path = %context.path(), "forwarding call upstream");

        Ok(async_stream::stream! {
            let response = match client.request(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(%call_id, "upstream request failed: {:?}", e);
                    yield Reply::Status(Error::BackendUnavailable(e).into());
                    return;
                }
            };

            let mut body = match open_response(response) {
                Ok((metadata, body)) => {
                    yield Reply::Headers(metadata);
                    body
                }
                Err(status) => {
                    yield Reply::Status(status);
                    return;
                }
            };

            let mut codec = FrameCodec::new().with_max_frame_size(max_message_size);
            let mut buf = BytesMut::new();

            loop {
                let frame = match body.frame().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!(%call_id, "upstream stream failed: {:?}", e);
                        yield Reply::Status(Status::unavailable(format!("upstream stream failed: {e}")));
                        return;
                    }
                    None => {
                        yield Reply::Status(end_without_trailers(&buf));
                        return;
                    }
                };

                let frame = match frame.into_data() {
                    Ok(data) => {
                        buf.extend_from_slice(&data);
                        loop {
                            match decode_message(&mut codec, &mut buf) {
                                Ok(Some(message)) => yield Reply::Message(message),
                                Ok(None) => break,
                                Err(status) => {
                                    yield Reply::Status(status);
                                    return;
                                }
                            }
                        }
                        continue;
                    }
                    Err(frame) => frame,
                };

                if let Ok(trailers) = frame.into_trailers() {
                    let status = if buf.is_empty() {
                        Status::from_trailers(&trailers)
                    } else {
                        Status::internal(format!(
                            "upstream trailers arrived with {} bytes of an incomplete message",
                            buf.len()
                        ))
                    };
                    debug!(%call_id, code = %status.code(), "upstream call finished");
                    yield Reply::Status(status);
                    return;
                }
            }
        }
        .boxed())
    }
}

/// Check the response head, returning the initial metadata and the body to
/// read messages from, or the status the call ends with right away.
fn open_response(
    response: Response<Incoming>,
) -> std::result::Result<(http::HeaderMap, Incoming), Status> {
    let (parts, body) = response.into_parts();

    if parts.status != StatusCode::OK {
        return Err(Status::from_http_status(parts.status));
    }

    // Trailers-only response
    if parts.headers.contains_key(GRPC_STATUS) {
        return Err(
            Status::from_trailers(&parts.headers).with_metadata(response_metadata(&parts.headers))
        );
    }

    if !parts
        .headers
        .get(CONTENT_TYPE)
        .is_some_and(is_grpc_content_type)
    {
        return Err(Status::unknown(format!(
            "upstream responded with unexpected content-type {:?}",
            parts.headers.get(CONTENT_TYPE)
        )));
    }

    Ok((response_metadata(&parts.headers), body))
}

fn decode_message(
    codec: &mut FrameCodec,
    buf: &mut BytesMut,
) -> std::result::Result<Option<Message>, Status> {
    match codec.decode(buf)? {
        None => Ok(None),
        Some(Frame::Data {
            compressed: false,
            payload,
        }) => Ok(Some(Message::new(payload))),
        Some(Frame::Data {
            compressed: true,
            payload,
        }) => Ok(Some(Message::compressed(payload))),
        Some(Frame::Trailer(_)) => Err(Status::internal(
            "upstream sent a trailer frame in a native gRPC body",
        )),
    }
}

fn end_without_trailers(buf: &BytesMut) -> Status {
    if buf.is_empty() {
        Status::unavailable("upstream closed the stream without trailers")
    } else {
        Status::internal(format!(
            "upstream closed the stream with {} bytes of an incomplete message",
            buf.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::stream;
    use grpc_web_codec::metadata::GRPC_ENCODING;
    use grpc_web_handler::CallMode;

    #[test]
    fn test_rejects_address_with_path() {
        let options = UpstreamHandlerOptions {
            uri: Uri::from_static("http://127.0.0.1:50051/prefix"),
            ..UpstreamHandlerOptions::default()
        };

        assert!(matches!(
            UpstreamHandler::new(options),
            Err(Error::InvalidUri(_))
        ));
    }

    #[test]
    fn test_rejects_relative_address() {
        let options = UpstreamHandlerOptions {
            uri: Uri::from_static("/relative"),
            ..UpstreamHandlerOptions::default()
        };

        assert!(matches!(
            UpstreamHandler::new(options),
            Err(Error::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn test_request_shape() {
        let handler = UpstreamHandler::new(UpstreamHandlerOptions::default()).unwrap();

        let mut metadata = http::HeaderMap::new();
        metadata.insert("x-tenant", HeaderValue::from_static("acme"));
        metadata.insert(GRPC_ENCODING, HeaderValue::from_static("gzip"));
        let context = CallContext::new("demo.Echo", "Say", CallMode::Unary)
            .with_metadata(metadata)
            .with_subtype(Some("proto".to_string()))
            .with_deadline(Some(Instant::now() + Duration::from_secs(2)));

        let request = handler
            .build_request(&context, stream::empty().boxed())
            .unwrap();

        assert_eq!(request.uri(), "http://127.0.0.1:50051/demo.Echo/Say");
        assert_eq!(request.headers()[CONTENT_TYPE], "application/grpc+proto");
        assert_eq!(request.headers()[TE], "trailers");
        assert_eq!(request.headers()["x-tenant"], "acme");
        assert_eq!(request.headers()[GRPC_ENCODING], "gzip");
        assert!(request.headers().contains_key(GRPC_TIMEOUT));
    }

    #[test]
    fn test_compressed_messages_are_relayed() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(
            &Frame::from(Message::compressed(Bytes::from_static(b"\x1f\x8b")))
                .encode()
                .unwrap(),
        );

        let message = decode_message(&mut FrameCodec::new(), &mut buf)
            .unwrap()
            .unwrap();

        assert!(message.is_compressed());
        assert_eq!(message.payload(), &Bytes::from_static(b"\x1f\x8b"));
    }

    #[test]
    fn test_end_without_trailers() {
        assert_eq!(
            end_without_trailers(&BytesMut::new()).code(),
            grpc_web_codec::Code::Unavailable
        );
        assert_eq!(
            end_without_trailers(&BytesMut::from(&b"\0"[..])).code(),
            grpc_web_codec::Code::Internal
        );
    }
}
