//! Wire-level building blocks for gRPC-Web.
//!
//! This crate contains everything needed to speak the gRPC-Web wire format
//! without committing to a transport:
//!
//! - [`Frame`] and [`FrameCodec`]: the length-prefixed data and trailer frames
//! - [`text`]: the base64 variant used by `application/grpc-web-text`
//! - [`Status`] and [`Code`]: the terminal status carried by every call
//! - [`metadata`]: content-type negotiation, header filtering and `grpc-timeout`
//!
//! # Example
//!
//! ```
//! use bytes::{Bytes, BytesMut};
//! use grpc_web_codec::{Frame, FrameCodec, Status};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut codec = FrameCodec::new();
//! let mut buf = BytesMut::new();
//!
//! codec.encode(Frame::data(Bytes::from_static(b"hello")), &mut buf).unwrap();
//! codec.encode(Frame::trailer(&Status::ok()), &mut buf).unwrap();
//!
//! assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::data(Bytes::from_static(b"hello"))));
//! assert!(codec.decode(&mut buf).unwrap().unwrap().is_trailer());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod frame;
pub mod metadata;
mod status;
pub mod text;
mod trailers;

pub use error::{FrameError, Result};
pub use frame::{
    COMPRESSED_FLAG, DATA_FLAG, FRAME_HEADER_SIZE, Frame, FrameCodec, MAX_FRAME_SIZE,
    TRAILER_FLAG, decode_frames,
};
pub use metadata::{ContentType, Encoding};
pub use status::{Code, GRPC_MESSAGE, GRPC_STATUS, Status};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
pub use http::HeaderMap;
