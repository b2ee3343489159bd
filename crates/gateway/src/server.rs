use crate::bridge;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::session::SessionManager;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method};
use axum::response::Response;
use grpc_web_codec::{GRPC_MESSAGE, GRPC_STATUS, MAX_FRAME_SIZE};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::{error, info};

/// Options for the gateway.
#[derive(Clone, Debug)]
pub struct GatewayOptions {
    /// Address to accept browser connections on.
    pub listen_addr: SocketAddr,

    /// Upper bound on every call's duration. Clients may ask for less with
    /// `grpc-timeout`.
    pub call_timeout: Option<Duration>,

    /// Largest request message accepted.
    pub max_message_size: usize,

    /// Buffered messages per call and direction.
    pub channel_capacity: usize,

    /// Origins allowed to make cross-origin calls. Empty allows any origin.
    pub allowed_origins: Vec<HeaderValue>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            call_timeout: None,
            max_message_size: MAX_FRAME_SIZE,
            channel_capacity: 16,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Clone)]
struct GatewayState {
    sessions: SessionManager,
    call_timeout: Option<Duration>,
    max_message_size: usize,
}

/// Serves gRPC-Web calls to browsers and dispatches them to handlers.
pub struct GrpcWebGateway {
    options: GatewayOptions,
    sessions: SessionManager,
    local_addr: RwLock<Option<SocketAddr>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    call_tracker: TaskTracker,
}

impl GrpcWebGateway {
    /// Creates a new instance of `GrpcWebGateway`.
    #[must_use]
    pub fn new(options: GatewayOptions, dispatcher: Dispatcher) -> Self {
        let shutdown_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let call_tracker = TaskTracker::new();

        let sessions = SessionManager::new(
            Arc::new(dispatcher),
            options.channel_capacity,
            shutdown_token.clone(),
            call_tracker.clone(),
        );

        Self {
            options,
            sessions,
            local_addr: RwLock::new(None),
            shutdown_token,
            task_tracker,
            call_tracker,
        }
    }

    /// The router serving gRPC-Web calls on every path, with CORS handling.
    /// Can be served standalone by [`Self::start`] or mounted elsewhere.
    pub fn router(&self) -> Router {
        let state = GatewayState {
            sessions: self.sessions.clone(),
            call_timeout: self.options.call_timeout,
            max_message_size: self.options.max_message_size,
        };

        Router::new()
            .fallback(handle_call)
            .with_state(state)
            .layer(cors_layer(&self.options.allowed_origins))
    }

    /// Bind the listen address and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway was already started or the address
    /// cannot be bound.
    pub async fn start(&self) -> Result<JoinHandle<()>> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let listener = tokio::net::TcpListener::bind(self.options.listen_addr)
            .await
            .map_err(Error::Bind)?;
        let local_addr = listener.local_addr().map_err(Error::Bind)?;
        *self.local_addr.write() = Some(local_addr);

        info!("grpc-web gateway listening on {}", local_addr);

        let router = self.router();
        let shutdown_token = self.shutdown_token.clone();

        let handle = self.task_tracker.spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_token.cancelled_owned())
                .await
            {
                error!("grpc-web gateway exited: {:?}", e);
            }
        });

        self.task_tracker.close();

        Ok(handle)
    }

    /// The address actually bound, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Number of calls in flight.
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.sessions.active_calls()
    }

    /// Stop accepting connections and end live calls with `unavailable`.
    pub async fn shutdown(&self) {
        info!("grpc-web gateway shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        self.call_tracker.close();
        self.call_tracker.wait().await;

        info!("grpc-web gateway shutdown");
    }
}

async fn handle_call(State(state): State<GatewayState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let content_type = match bridge::negotiate(&parts.method, &parts.headers) {
        Ok(content_type) => content_type,
        Err(rejection) => return rejection,
    };

    let deadline = bridge::deadline(&parts.headers, state.call_timeout);
    let frames = bridge::request_frames(body, content_type.encoding(), state.max_message_size);
    let call = bridge::call_request(
        parts.uri.path(),
        &parts.headers,
        &content_type,
        deadline,
        frames,
    );

    bridge::respond(&content_type, state.sessions.start(call)).await
}

fn cors_layer(allowed_origins: &[HeaderValue]) -> CorsLayer {
    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(allowed_origins.iter().cloned())
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers([GRPC_STATUS, GRPC_MESSAGE])
        .max_age(Duration::from_secs(24 * 60 * 60))
}
