use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};

use crate::{CallContext, Handler, Message, Reply, ReplyStream, RequestStream, Status};

/// Adapts an async function into a unary [`Handler`].
///
/// The function receives the context and the single request message and
/// returns the response message or a status. Compressed requests are
/// answered with `unimplemented`, since the function only sees raw bytes.
pub struct UnaryFn<F> {
    f: F,
}

/// Wrap an async function as a unary handler.
pub const fn unary_fn<F, Fut>(f: F) -> UnaryFn<F>
where
    F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, Status>> + Send + 'static,
{
    UnaryFn { f }
}

impl<F> fmt::Debug for UnaryFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Handler for UnaryFn<F>
where
    F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, Status>> + Send + 'static,
{
    async fn call(
        &self,
        context: CallContext,
        mut requests: RequestStream,
    ) -> Result<ReplyStream, Status> {
        let Some(request) = requests.next().await else {
            return Err(Status::internal("missing request message"));
        };

        if request.is_compressed() {
            return Err(Status::unimplemented(
                "compressed request messages are not supported by this method",
            ));
        }

        let replies = match (self.f)(context, request.into_payload()).await {
            Ok(response) => vec![
                Reply::Message(Message::new(response)),
                Reply::Status(Status::ok()),
            ],
            Err(status) => vec![Reply::Status(status)],
        };

        Ok(stream::iter(replies).boxed())
    }
}
