//! CLI binary that serves gRPC-Web to browsers and forwards calls to a gRPC
//! backend.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use grpc_web_gateway::{Dispatcher, GatewayOptions, GrpcWebGateway};
use grpc_web_handler_upstream::{UpstreamHandler, UpstreamHandlerOptions};
use http::{HeaderValue, Uri};
use tracing::{info, warn};

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Gateway error
    #[error(transparent)]
    Gateway(#[from] grpc_web_gateway::Error),

    /// An allowed origin is not a valid header value
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    /// Signal handler could not be installed
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),

    /// Upstream handler error
    #[error(transparent)]
    Upstream(#[from] grpc_web_handler_upstream::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to accept gRPC-Web calls on
    #[arg(long, default_value = "127.0.0.1:8080", env = "GRPC_WEB_LISTEN_ADDR")]
    listen_addr: SocketAddr,

    /// gRPC backend to forward calls to
    #[arg(
        long,
        default_value = "http://127.0.0.1:50051",
        env = "GRPC_WEB_UPSTREAM"
    )]
    upstream: Uri,

    /// Fully-qualified services to expose, e.g. `helloworld.Greeter`
    #[arg(
        long = "service",
        env = "GRPC_WEB_SERVICES",
        value_delimiter = ','
    )]
    services: Vec<String>,

    /// Upper bound on each call's duration, in seconds
    #[arg(long, env = "GRPC_WEB_CALL_TIMEOUT_SECS")]
    call_timeout_secs: Option<u64>,

    /// Timeout for connecting to the backend, in seconds
    #[arg(long, default_value_t = 5, env = "GRPC_WEB_CONNECT_TIMEOUT_SECS")]
    connect_timeout_secs: u64,

    /// Largest message accepted in either direction, in bytes
    #[arg(long, default_value_t = 4 * 1024 * 1024, env = "GRPC_WEB_MAX_MESSAGE_SIZE")]
    max_message_size: usize,

    /// Origins allowed to make cross-origin calls. Any origin when empty
    #[arg(long = "allowed-origin", env = "GRPC_WEB_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

fn build_dispatcher(args: &Args) -> Result<Dispatcher, Error> {
    // One client, so every service shares the backend's HTTP/2 connection.
    let upstream = UpstreamHandler::new(UpstreamHandlerOptions {
        uri: args.upstream.clone(),
        connect_timeout: Duration::from_secs(args.connect_timeout_secs),
        max_message_size: args.max_message_size,
    })?;

    let mut builder = Dispatcher::builder();
    for service in &args.services {
        info!("forwarding {} to {}", service, args.upstream);
        builder = builder.register_service(service, upstream.clone())?;
    }

    Ok(builder.build())
}

fn gateway_options(args: &Args) -> Result<GatewayOptions, Error> {
    let allowed_origins = args
        .allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| Error::InvalidOrigin(origin.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(GatewayOptions {
        listen_addr: args.listen_addr,
        call_timeout: args.call_timeout_secs.map(Duration::from_secs),
        max_message_size: args.max_message_size,
        allowed_origins,
        ..GatewayOptions::default()
    })
}

async fn wait_for_signal() -> Result<(), Error> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received interrupt signal");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.services.is_empty() {
        warn!("no services configured; every call will be answered with not-found");
    }

    let dispatcher = build_dispatcher(&args)?;
    let gateway = GrpcWebGateway::new(gateway_options(&args)?, dispatcher);

    gateway.start().await?;

    wait_for_signal().await?;

    info!("Shutting down");
    gateway.shutdown().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_services_share_one_upstream() {
        let args = Args::try_parse_from([
            "grpc-web-gateway",
            "--upstream",
            "http://127.0.0.1:50051",
            "--service",
            "demo.Echo,demo.Greeter",
        ])
        .unwrap();

        let dispatcher = build_dispatcher(&args).unwrap();

        assert_eq!(dispatcher.len(), 2);
        assert!(dispatcher.resolve("demo.Echo", "Say").is_ok());
        assert!(dispatcher.resolve("demo.Greeter", "Hello").is_ok());
        assert!(dispatcher.resolve("demo.Other", "Say").is_err());
    }

    #[test]
    fn test_rejects_invalid_origin() {
        let args = Args::try_parse_from(["grpc-web-gateway", "--allowed-origin", "bad\norigin"])
            .unwrap();

        assert!(matches!(
            gateway_options(&args),
            Err(Error::InvalidOrigin(_))
        ));
    }
}
