//! Frame layout for the gRPC-Web wire protocol.
//!
//! Every frame is `[flag:1][length:4 big-endian][payload:length]`. Data frames
//! carry one serialized message; trailer frames carry the call's terminal
//! metadata as `key: value\r\n` lines.

use crate::error::{FrameError, Result};
use crate::status::Status;
use crate::trailers;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::HeaderMap;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (4MB by default, matching common gRPC limits).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Frame header size (1 byte flag + 4 bytes length).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Flag byte of an uncompressed data frame.
pub const DATA_FLAG: u8 = 0x00;

/// Flag byte of a data frame whose payload is compressed.
pub const COMPRESSED_FLAG: u8 = 0x01;

/// Flag byte of a trailer frame.
pub const TRAILER_FLAG: u8 = 0x80;

/// A frame in the gRPC-Web wire protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A length-prefixed message.
    Data {
        /// Whether the payload was compressed by the sender.
        compressed: bool,
        /// Serialized message bytes.
        payload: Bytes,
    },

    /// Terminal metadata, delivered in-band because browsers cannot read
    /// HTTP trailers.
    ///
    /// Values follow HTTP field rules: whitespace around a value is dropped
    /// when the frame is decoded. `grpc-message` escapes its own surrounding
    /// spaces, so status messages survive intact.
    Trailer(HeaderMap),
}

impl Frame {
    /// Create an uncompressed data frame.
    #[must_use]
    pub const fn data(payload: Bytes) -> Self {
        Self::Data {
            compressed: false,
            payload,
        }
    }

    /// Create the trailer frame for a terminal status.
    #[must_use]
    pub fn trailer(status: &Status) -> Self {
        Self::Trailer(status.to_trailers())
    }

    /// Returns `true` for trailer frames.
    #[must_use]
    pub const fn is_trailer(&self) -> bool {
        matches!(self, Self::Trailer(_))
    }

    /// The flag byte this frame is written with.
    #[must_use]
    pub const fn flag(&self) -> u8 {
        match self {
            Self::Data {
                compressed: false, ..
            } => DATA_FLAG,
            Self::Data {
                compressed: true, ..
            } => COMPRESSED_FLAG,
            Self::Trailer(_) => TRAILER_FLAG,
        }
    }

    /// Encode this frame into a standalone buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit a 32-bit length prefix.
    pub fn encode(self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        FrameCodec::unbounded().encode(self, &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Decode every frame contained in a complete buffer.
///
/// # Errors
///
/// Returns an error if a frame is malformed or the buffer ends mid-frame.
pub fn decode_frames(bytes: &[u8]) -> Result<Vec<Frame>> {
    let mut codec = FrameCodec::unbounded();
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();

    while let Some(frame) = codec.decode_eof(&mut buf)? {
        frames.push(frame);
    }

    Ok(frames)
}

/// Codec for encoding/decoding gRPC-Web frames.
///
/// The decoder keeps partially received frames in the caller's buffer, so
/// it can be driven by reads split at arbitrary boundaries.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    const fn unbounded() -> Self {
        Self {
            max_frame_size: u32::MAX as usize,
        }
    }

    /// The largest payload this codec accepts.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        // The flag can be rejected before the rest of the header arrives
        let Some(&flag) = buf.first() else {
            return Ok(None);
        };
        if !matches!(flag, DATA_FLAG | COMPRESSED_FLAG | TRAILER_FLAG) {
            return Err(FrameError::UnknownFlag(flag));
        }

        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        let mut header = &buf[1..FRAME_HEADER_SIZE];
        let payload_len = header.get_u32() as usize;

        if payload_len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: payload_len,
                max: self.max_frame_size,
            });
        }

        let frame_len = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        let frame = match flag {
            TRAILER_FLAG => Frame::Trailer(trailers::decode(&payload)?),
            flag => Frame::Data {
                compressed: flag == COMPRESSED_FLAG,
                payload,
            },
        };

        Ok(Some(frame))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::Truncated {
                remaining: buf.len(),
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<()> {
        let flag = frame.flag();
        let payload = match frame {
            Frame::Data { payload, .. } => payload,
            Frame::Trailer(headers) => trailers::encode(&headers),
        };

        let payload_len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;

        buf.reserve(FRAME_HEADER_SIZE + payload.len());
        buf.put_u8(flag);
        buf.put_u32(payload_len);
        buf.put(payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    #[test]
    fn test_data_frame_layout() {
        let bytes = Frame::data(Bytes::from_static(b"abc")).encode().unwrap();

        assert_eq!(&bytes[..], &[0x00, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_trailer_frame_layout() {
        let bytes = Frame::trailer(&Status::ok()).encode().unwrap();
        let payload = b"grpc-status: 0\r\n";

        assert_eq!(bytes[0], TRAILER_FLAG);
        assert_eq!(&bytes[1..5], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&bytes[5..], payload);
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        buf.put_u8(DATA_FLAG);
        buf.put_u32(100);
        buf.put_slice(b"only a few bytes");

        assert!(codec.decode(&mut buf).unwrap().is_none());
        // Nothing consumed while waiting for the rest
        assert_eq!(buf.len(), FRAME_HEADER_SIZE + 16);
    }

    #[test]
    fn test_unknown_flag_is_rejected_early() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x42][..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::UnknownFlag(0x42))
        ));
    }

    #[test]
    fn test_compressed_trailer_flag_is_unknown() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x81, 0, 0, 0, 0][..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::UnknownFlag(0x81))
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = FrameCodec::new().with_max_frame_size(8);
        let mut buf = BytesMut::new();
        buf.put_u8(DATA_FLAG);
        buf.put_u32(9);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.is_too_large());
    }

    #[test]
    fn test_truncated_at_eof() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0, 0, 0, 4, 1, 2][..]);

        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(FrameError::Truncated { remaining: 7 })
        ));
    }

    #[test]
    fn test_compressed_data_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[COMPRESSED_FLAG, 0, 0, 0, 1, 0xff][..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Data {
                compressed: true,
                payload: Bytes::from_static(&[0xff]),
            })
        );
    }

    #[test]
    fn test_decode_frames_reads_status() {
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&Frame::data(Bytes::from_static(b"x")).encode().unwrap());
        bytes.extend_from_slice(
            &Frame::trailer(&Status::new(Code::NotFound, "missing"))
                .encode()
                .unwrap(),
        );

        let frames = decode_frames(&bytes).unwrap();
        assert_eq!(frames.len(), 2);

        let Frame::Trailer(trailers) = &frames[1] else {
            panic!("expected trailer frame");
        };
        let status = Status::from_trailers(trailers);
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "missing");
    }
}
