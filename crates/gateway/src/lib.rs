//! A gateway that lets browsers call gRPC services over gRPC-Web.
//!
//! Browsers speak HTTP/1.1 (or HTTP/2 without trailers), so gRPC-Web moves
//! the call's status into a final in-band frame. The gateway accepts those
//! calls, resolves each one to a registered [`Handler`] through the
//! [`Dispatcher`], and drives it through an explicit per-call state machine
//! until exactly one status has been sent back.
//!
//! Handlers may run in process, forward to an HTTP/2 backend, or be test
//! doubles; the gateway treats them all alike.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

pub mod bridge;
mod dispatcher;
mod error;
mod server;
mod session;
mod state;

pub use dispatcher::{Dispatcher, DispatcherBuilder, Registration};
pub use error::{Error, Result};
pub use server::{GatewayOptions, GrpcWebGateway};
pub use session::{CallOutcome, CallRequest, CallResponse, FrameStream, SessionManager};
pub use state::{Call, CallEvent, CallState};

pub use grpc_web_handler::{CallMode, Handler};
