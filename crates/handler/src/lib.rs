//! Abstract interface for handlers that serve gRPC-Web calls.
//!
//! A handler receives the call's context and a stream of request messages,
//! and answers with a stream of [`Reply`] items: optional initial metadata,
//! zero or more messages, and finally a [`Status`]. In-process services, the
//! HTTP/2 upstream and test doubles all implement [`Handler`], so the gateway
//! drives every one of them the same way.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod context;
mod message;
mod unary;

pub use context::{CallContext, CallMode};
pub use message::Message;
pub use grpc_web_codec::{Code, Status};
pub use unary::{UnaryFn, unary_fn};

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use http::HeaderMap;

/// Request messages of a call, in the order the client sent them. The
/// stream ends when the client half-closes.
pub type RequestStream = BoxStream<'static, Message>;

/// Replies produced by a handler.
pub type ReplyStream = BoxStream<'static, Reply>;

/// One item of a handler's reply stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Initial metadata. Only valid as the first item.
    Headers(HeaderMap),

    /// A serialized response message.
    Message(Message),

    /// The terminal status. Nothing after it is read.
    Status(Status),
}

/// A trait representing something that can serve gRPC-Web calls.
#[async_trait]
pub trait Handler
where
    Self: Debug + Send + Sync + 'static,
{
    /// Start serving a call.
    ///
    /// Returning an error rejects the call before any reply is produced; the
    /// status is delivered to the client as a trailers-only response.
    /// Dropping the returned stream cancels the call.
    async fn call(
        &self,
        context: CallContext,
        requests: RequestStream,
    ) -> Result<ReplyStream, Status>;
}
