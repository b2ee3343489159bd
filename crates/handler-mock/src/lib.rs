//! A scripted implementation of the gRPC-Web handler, for tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use grpc_web_handler::{
    CallContext, Handler, Message, Reply, ReplyStream, RequestStream, Status,
};
use http::HeaderMap;
use parking_lot::Mutex;

/// One step of a mock handler's script.
#[derive(Clone, Debug)]
pub enum MockStep {
    /// Reply with initial metadata.
    Headers(HeaderMap),

    /// Reply with a message.
    Message(Message),

    /// Reply with the terminal status.
    Status(Status),

    /// Sleep before the next step.
    Delay(Duration),

    /// Read every request message until the client half-closes.
    Drain,

    /// Reply with each request message as it arrives, until the client
    /// half-closes.
    Echo,

    /// End the reply stream without a status, like a backend going away.
    Disconnect,

    /// Never produce another reply.
    Hang,
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Mutex<Vec<CallContext>>,
    received: Mutex<Vec<Bytes>>,
    cancelled: AtomicUsize,
}

/// A mock implementation of the `Handler` trait that plays a fixed script
/// for every call and records what it saw. Used for testing.
#[derive(Clone, Debug, Default)]
pub struct MockHandler {
    script: Vec<MockStep>,
    reject: Option<Status>,
    recorded: Arc<Recorded>,
}

impl MockHandler {
    /// Creates a mock with an empty script. Its reply stream ends
    /// immediately without a status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to the script.
    #[must_use]
    pub fn step(mut self, step: MockStep) -> Self {
        self.script.push(step);
        self
    }

    /// Reply with initial metadata.
    #[must_use]
    pub fn headers(self, headers: HeaderMap) -> Self {
        self.step(MockStep::Headers(headers))
    }

    /// Reply with a message.
    #[must_use]
    pub fn message(self, message: impl Into<Bytes>) -> Self {
        self.step(MockStep::Message(Message::new(message.into())))
    }

    /// Reply with a message flagged as compressed.
    #[must_use]
    pub fn compressed_message(self, message: impl Into<Bytes>) -> Self {
        self.step(MockStep::Message(Message::compressed(message.into())))
    }

    /// Reply with a terminal status.
    #[must_use]
    pub fn status(self, status: Status) -> Self {
        self.step(MockStep::Status(status))
    }

    /// Reply with an OK status.
    #[must_use]
    pub fn ok(self) -> Self {
        self.status(Status::ok())
    }

    /// Sleep before the next step.
    #[must_use]
    pub fn delay(self, delay: Duration) -> Self {
        self.step(MockStep::Delay(delay))
    }

    /// Read all request messages.
    #[must_use]
    pub fn drain(self) -> Self {
        self.step(MockStep::Drain)
    }

    /// Echo request messages back as they arrive.
    #[must_use]
    pub fn echo(self) -> Self {
        self.step(MockStep::Echo)
    }

    /// End the reply stream without a status.
    #[must_use]
    pub fn disconnect(self) -> Self {
        self.step(MockStep::Disconnect)
    }

    /// Stop replying and wait to be cancelled.
    #[must_use]
    pub fn hang(self) -> Self {
        self.step(MockStep::Hang)
    }

    /// Reject every call before it starts.
    #[must_use]
    pub fn reject(mut self, status: Status) -> Self {
        self.reject = Some(status);
        self
    }

    /// Contexts of every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CallContext> {
        self.recorded.calls.lock().clone()
    }

    /// Every request message read so far, across all calls.
    #[must_use]
    pub fn received(&self) -> Vec<Bytes> {
        self.recorded.received.lock().clone()
    }

    /// Number of reply streams dropped before the script finished.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.recorded.cancelled.load(Ordering::SeqCst)
    }
}

/// Counts a cancellation unless disarmed before being dropped.
struct CancelGuard {
    recorded: Arc<Recorded>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.recorded.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Handler for MockHandler {
    async fn call(
        &self,
        context: CallContext,
        mut requests: RequestStream,
    ) -> Result<ReplyStream, Status> {
        self.recorded.calls.lock().push(context);

        if let Some(status) = &self.reject {
            return Err(status.clone());
        }

        let script = self.script.clone();
        let recorded = self.recorded.clone();

        Ok(async_stream::stream! {
            let mut guard = CancelGuard {
                recorded: recorded.clone(),
                armed: true,
            };

            for step in script {
                match step {
                    MockStep::Headers(headers) => yield Reply::Headers(headers),
                    MockStep::Message(message) => yield Reply::Message(message),
                    MockStep::Status(status) => {
                        guard.armed = false;
                        yield Reply::Status(status);
                        return;
                    }
                    MockStep::Delay(delay) => tokio::time::sleep(delay).await,
                    MockStep::Drain => {
                        while let Some(request) = requests.next().await {
                            recorded.received.lock().push(request.into_payload());
                        }
                    }
                    MockStep::Echo => {
                        while let Some(request) = requests.next().await {
                            recorded.received.lock().push(request.payload().clone());
                            yield Reply::Message(request);
                        }
                    }
                    MockStep::Disconnect => break,
                    MockStep::Hang => futures::future::pending::<()>().await,
                }
            }

            guard.armed = false;
        }
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::stream;
    use grpc_web_handler::{CallMode, Code};

    fn context() -> CallContext {
        CallContext::new("demo.Echo", "Say", CallMode::BidiStreaming)
    }

    #[tokio::test]
    async fn test_script_is_replayed() {
        let handler = MockHandler::new().drain().message("pong").ok();

        let replies: Vec<_> = handler
            .call(context(), stream::iter([Message::from("ping")]).boxed())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            replies,
            vec![
                Reply::Message(Message::from("pong")),
                Reply::Status(Status::ok())
            ]
        );
        assert_eq!(handler.received(), vec![Bytes::from_static(b"ping")]);
        assert_eq!(handler.calls().len(), 1);
        assert_eq!(handler.cancelled(), 0);
    }

    #[tokio::test]
    async fn test_echo() {
        let handler = MockHandler::new().echo().ok();
        let requests = stream::iter([
            Message::from("a"),
            Message::compressed(Bytes::from_static(b"b")),
        ]);

        let replies: Vec<_> = handler
            .call(context(), requests.boxed())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(replies.len(), 3);
        assert_eq!(
            replies[1],
            Reply::Message(Message::compressed(Bytes::from_static(b"b")))
        );
    }

    #[tokio::test]
    async fn test_reject() {
        let handler = MockHandler::new().reject(Status::new(Code::PermissionDenied, "no"));

        let result = handler.call(context(), stream::empty().boxed()).await;

        assert_eq!(
            result.err().map(|status| status.code()),
            Some(Code::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn test_dropping_a_hung_stream_counts_as_cancelled() {
        let handler = MockHandler::new().message("first").hang();

        let mut replies = handler
            .call(context(), stream::empty().boxed())
            .await
            .unwrap();
        assert!(matches!(replies.next().await, Some(Reply::Message(_))));

        drop(replies);
        assert_eq!(handler.cancelled(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_not_a_cancellation() {
        let handler = MockHandler::new().message("only").disconnect();

        let replies: Vec<_> = handler
            .call(context(), stream::empty().boxed())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(replies.len(), 1);
        assert_eq!(handler.cancelled(), 0);
    }
}
