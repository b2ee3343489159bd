//! Drives calls from the first request frame to the terminal status.
//!
//! Each call gets a driver task that owns its [`Call`] and is the only
//! writer of its outbound frames. The rest of the request body is read by a
//! second task, which the driver joins before the call closes.
//!
//! Every outbound send races the call's interrupts, so a client that stops
//! reading cannot hold the handler past its deadline or past shutdown. The
//! status trailer is queued only after the handler has been dropped.

use crate::dispatcher::{Dispatcher, Registration};
use crate::error::Result;
use crate::state::{Call, CallEvent};

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use grpc_web_codec::{Frame, FrameError, Status};
use grpc_web_handler::{CallContext, CallMode, Message, Reply};
use http::HeaderMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument, warn};

/// Decoded request frames of one call.
pub type FrameStream = BoxStream<'static, std::result::Result<Frame, FrameError>>;

type InboundResult = std::result::Result<usize, Status>;
type Inbound = JoinHandle<InboundResult>;

/// A call as handed over by the HTTP front end.
pub struct CallRequest {
    /// Service name from the path.
    pub service: String,

    /// Method name from the path.
    pub method: String,

    /// Application metadata from the request headers.
    pub metadata: HeaderMap,

    /// When the call must be finished by.
    pub deadline: Option<Instant>,

    /// Message subtype from the content type.
    pub subtype: Option<String>,

    /// Request frames, decoded from the body.
    pub frames: FrameStream,
}

/// The outbound half of a call.
pub struct CallResponse {
    /// Initial metadata. Resolves once the handler first replies, or with
    /// empty metadata when the call ends before that.
    pub head: oneshot::Receiver<HeaderMap>,

    /// Outbound frames. The last one is the status trailer unless the
    /// client went away or stopped reading during shutdown.
    pub frames: mpsc::Receiver<Frame>,
}

/// How a call ended, as seen by its driver task.
#[derive(Debug)]
pub struct CallOutcome {
    /// The call's final bookkeeping.
    pub call: Call,

    /// Events the state machine refused while driving the call.
    pub rejected_events: usize,
}

/// Starts and tracks the calls of one gateway.
#[derive(Clone, Debug)]
pub struct SessionManager {
    dispatcher: Arc<Dispatcher>,
    channel_capacity: usize,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl SessionManager {
    /// Creates a new `SessionManager`.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        channel_capacity: usize,
        shutdown_token: CancellationToken,
        task_tracker: TaskTracker,
    ) -> Self {
        Self {
            dispatcher,
            channel_capacity: channel_capacity.max(1),
            shutdown_token,
            task_tracker,
        }
    }

    /// Start a call on its own task.
    pub fn start(&self, request: CallRequest) -> CallResponse {
        self.spawn(request).0
    }

    /// Start a call on its own task, keeping a handle that resolves once the
    /// call is closed.
    pub fn spawn(&self, request: CallRequest) -> (CallResponse, JoinHandle<CallOutcome>) {
        let CallRequest {
            service,
            method,
            metadata,
            deadline,
            subtype,
            frames,
        } = request;

        let registration = self.dispatcher.resolve(&service, &method).cloned();
        let mode = registration
            .as_ref()
            .map_or(CallMode::Unary, Registration::mode);

        let context = CallContext::new(service, method, mode)
            .with_metadata(metadata)
            .with_deadline(deadline)
            .with_subtype(subtype);

        let (head_tx, head_rx) = oneshot::channel();
        let (frames_tx, frames_rx) = mpsc::channel(self.channel_capacity);

        let driver = Driver {
            call: Call::new(context.id(), mode),
            head: Some(head_tx),
            frames: frames_tx,
            deadline,
            channel_capacity: self.channel_capacity,
            shutdown_token: self.shutdown_token.clone(),
            status: None,
            rejected_events: 0,
        };

        let outcome = self
            .task_tracker
            .spawn(driver.run(context, registration, frames));

        let response = CallResponse {
            head: head_rx,
            frames: frames_rx,
        };

        (response, outcome)
    }

    /// Number of calls still running.
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.task_tracker.len()
    }
}

/// Why a call stopped waiting on its handler.
#[derive(Debug)]
enum Interrupt {
    Deadline,
    ClientGone,
    Shutdown,
}

struct Driver {
    call: Call,
    head: Option<oneshot::Sender<HeaderMap>>,
    frames: mpsc::Sender<Frame>,
    deadline: Option<Instant>,
    channel_capacity: usize,
    shutdown_token: CancellationToken,
    /// Status waiting to be queued once the handler is gone.
    status: Option<Status>,
    rejected_events: usize,
}

impl Driver {
    #[instrument(name = "call", skip_all, fields(call_id = %context.id(), path = %context.path()))]
    async fn run(
        mut self,
        context: CallContext,
        registration: Result<Registration>,
        frames: FrameStream,
    ) -> CallOutcome {
        let inbound = match registration {
            Ok(registration) => self.serve(context, &registration, frames).await,
            Err(e) => {
                debug!("rejecting call: {}", e);
                self.finish(e.into());
                None
            }
        };

        self.close(inbound).await;

        CallOutcome {
            call: self.call,
            rejected_events: self.rejected_events,
        }
    }

    /// Run the call until a status is emitted or it is interrupted. Returns
    /// the inbound task if it is still running.
    async fn serve(
        &mut self,
        context: CallContext,
        registration: &Registration,
        mut frames: FrameStream,
    ) -> Option<Inbound> {
        let mode = registration.mode();

        let first = tokio::select! {
            interrupt = self.interrupted() => {
                self.interrupt(interrupt);
                return None;
            }
            first = frames.next() => first,
        };

        let first = match first.map(|frame| frame.map_err(Status::from).and_then(request_message)) {
            Some(Ok(message)) => Some(message),
            Some(Err(status)) => {
                self.finish(status);
                return None;
            }
            None if mode.streams_requests() => None,
            None => {
                self.finish(Status::internal("missing request message"));
                return None;
            }
        };

        let (requests_tx, requests_rx) = mpsc::channel(self.channel_capacity);
        self.apply(CallEvent::Invoke);

        let mut inbound = match first {
            Some(message) => {
                self.call.add_requests(1);
                // Capacity is at least one, so the first message always fits
                let _ = requests_tx.try_send(message);
                Some(tokio::spawn(forward_requests(frames, requests_tx, mode)))
            }
            None => {
                drop(requests_tx);
                self.apply(CallEvent::RequestEnd);
                None
            }
        };

        debug!(%mode, "invoking handler");

        let handler = registration.handler();
        let requests = ReceiverStream::new(requests_rx).boxed();

        let replies = tokio::select! {
            interrupt = self.interrupted() => {
                self.interrupt(interrupt);
                return inbound;
            }
            replies = handler.call(context, requests) => replies,
        };

        let mut replies = match replies {
            Ok(replies) => replies,
            Err(status) => {
                debug!(code = %status.code(), "handler rejected call");
                self.finish(status);
                return inbound;
            }
        };

        while !self.call.status_sent() && !self.call.is_closed() {
            tokio::select! {
                biased;

                interrupt = self.interrupted() => self.interrupt(interrupt),
                joined = join(&mut inbound), if inbound.is_some() => {
                    inbound = None;
                    match joined {
                        Ok(Ok(forwarded)) => {
                            self.call.add_requests(forwarded);
                            self.apply(CallEvent::RequestEnd);
                        }
                        Ok(Err(status)) => self.finish(status),
                        Err(e) => {
                            error!("request reader failed: {}", e);
                            self.finish(Status::internal("request reader failed"));
                        }
                    }
                }
                reply = replies.next() => self.relay(reply, mode).await,
            }
        }

        // Dropping the replies cancels the handler
        drop(replies);

        inbound
    }

    /// Forward one handler reply to the client.
    async fn relay(&mut self, reply: Option<Reply>, mode: CallMode) {
        match reply {
            Some(Reply::Headers(metadata)) => {
                if self.head.is_none() {
                    self.finish(Status::internal("handler sent metadata after replying"));
                    return;
                }
                self.send_head(metadata);
                self.apply(CallEvent::Reply);
            }
            Some(Reply::Message(message)) => {
                if self.call.responses() > 0 && !mode.streams_responses() {
                    self.finish(Status::internal(format!(
                        "more than one response message for a {mode} call"
                    )));
                    return;
                }
                self.send_head(HeaderMap::new());
                self.apply(CallEvent::Reply);
                self.call.add_response();

                if let Some(interrupt) = self.send_frame(Frame::from(message)).await {
                    self.interrupt(interrupt);
                }
            }
            Some(Reply::Status(status)) => self.finish(status),
            None => {
                warn!("handler ended the call without a status");
                self.finish(Status::unavailable("handler ended the call without a status"));
            }
        }
    }

    /// Queue an outbound frame unless the call is interrupted first.
    async fn send_frame(&self, frame: Frame) -> Option<Interrupt> {
        tokio::select! {
            biased;

            interrupt = self.interrupted() => Some(interrupt),
            sent = self.frames.send(frame) => sent.err().map(|_| Interrupt::ClientGone),
        }
    }

    async fn interrupted(&self) -> Interrupt {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = self.shutdown_token.cancelled() => Interrupt::Shutdown,
            () = self.frames.closed() => Interrupt::ClientGone,
            () = deadline => Interrupt::Deadline,
        }
    }

    fn interrupt(&mut self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Deadline => self.finish(Status::deadline_exceeded("deadline exceeded")),
            Interrupt::Shutdown => self.finish(Status::unavailable("gateway is shutting down")),
            Interrupt::ClientGone => {
                debug!("client went away");
                self.apply(CallEvent::Reset);
            }
        }
    }

    /// Settle the terminal status. It is queued by [`Self::close`] once the
    /// handler has been dropped. Later calls are rejected by the state
    /// machine and logged.
    fn finish(&mut self, status: Status) {
        if !self.apply(CallEvent::Status) {
            return;
        }

        debug!(
            code = %status.code(),
            requests = self.call.requests(),
            responses = self.call.responses(),
            "call finished"
        );

        self.status = Some(status);
    }

    /// Queue the status trailer. A client that is gone, or that stops
    /// reading while the gateway shuts down, gets a reset instead.
    async fn deliver(&mut self, status: Status) {
        self.send_head(HeaderMap::new());

        let delivered = tokio::select! {
            biased;

            sent = self.frames.send(Frame::trailer(&status)) => sent.is_ok(),
            () = self.shutdown_token.cancelled() => false,
        };

        if !delivered {
            debug!(code = %status.code(), "status not delivered");
            if !self.call.is_closed() {
                self.apply(CallEvent::Reset);
            }
        }
    }

    fn send_head(&mut self, metadata: HeaderMap) {
        if let Some(head) = self.head.take() {
            let _ = head.send(metadata);
        }
    }

    /// Stop reading the request and move the call to `Closed`.
    async fn close(&mut self, inbound: Option<Inbound>) {
        if let Some(inbound) = inbound {
            inbound.abort();
            let _ = inbound.await;
        }

        if let Some(status) = self.status.take() {
            self.deliver(status).await;
        }

        if !self.call.is_closed() {
            self.apply(CallEvent::RequestEnd);
        }

        debug_assert!(self.call.is_closed(), "call left in {:?}", self.call.state());
    }

    fn apply(&mut self, event: CallEvent) -> bool {
        match self.call.apply(event) {
            Ok(_) => true,
            Err(e) => {
                error!("{}", e);
                self.rejected_events += 1;
                false
            }
        }
    }
}

async fn join(
    inbound: &mut Option<Inbound>,
) -> std::result::Result<InboundResult, tokio::task::JoinError> {
    match inbound {
        Some(inbound) => inbound.await,
        None => std::future::pending().await,
    }
}

/// Read the rest of the request body into the handler's request stream.
/// Returns the number of messages forwarded.
async fn forward_requests(
    mut frames: FrameStream,
    requests: mpsc::Sender<Message>,
    mode: CallMode,
) -> InboundResult {
    let mut forwarded = 0;

    while let Some(frame) = frames.next().await {
        let message = request_message(frame?)?;

        if !mode.streams_requests() {
            return Err(Status::internal(format!(
                "more than one request message for a {mode} call"
            )));
        }

        // A handler that stopped reading still gets the rest of the body
        // checked for framing errors
        if requests.send(message).await.is_ok() {
            forwarded += 1;
        }
    }

    Ok(forwarded)
}

/// Compressed messages pass through untouched. Decoding them is up to the
/// handler, which sees the call's `grpc-encoding`.
fn request_message(frame: Frame) -> std::result::Result<Message, Status> {
    match frame {
        Frame::Data {
            compressed: false,
            payload,
        } => Ok(Message::new(payload)),
        Frame::Data {
            compressed: true,
            payload,
        } => Ok(Message::compressed(payload)),
        Frame::Trailer(_) => Err(Status::internal("unexpected trailer frame in request")),
    }
}
