//! The base64 variant of the wire format (`application/grpc-web-text`).
//!
//! Browsers that cannot stream binary responses receive every frame base64
//! encoded. Peers may concatenate independently padded chunks, so padding can
//! appear in the middle of a body and the decoder has to restart after it.

use std::io;

use crate::error::{FrameError, Result};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// Base64-encode one chunk of output.
#[must_use]
pub fn encode(bytes: &[u8]) -> Bytes {
    Bytes::from(STANDARD.encode(bytes))
}

/// Incremental base64 decoder that tolerates arbitrary input splits.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: BytesMut,
}

impl TextDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of base64 text, returning every byte that can be decoded
    /// so far. Incomplete quanta are held back until more input arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Bytes> {
        self.pending.extend(
            chunk
                .iter()
                .copied()
                .filter(|byte| !byte.is_ascii_whitespace()),
        );

        let complete = self.pending.len() / 4 * 4;
        let quanta = self.pending.split_to(complete);

        let mut decoded = Vec::with_capacity(complete / 4 * 3);
        let mut start = 0;
        for end in (4..=quanta.len()).step_by(4) {
            // A padded quantum closes one encoded chunk
            if quanta[end - 1] == b'=' || end == quanta.len() {
                STANDARD
                    .decode_vec(&quanta[start..end], &mut decoded)
                    .map_err(|e| FrameError::InvalidBase64(e.to_string()))?;
                start = end;
            }
        }

        Ok(Bytes::from(decoded))
    }

    /// Check that no partial quantum is left over.
    ///
    /// # Errors
    ///
    /// Returns an error if the input ended mid-quantum.
    pub fn finish(&self) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(FrameError::InvalidBase64(format!(
                "{} trailing characters do not form a base64 quantum",
                self.pending.len()
            )))
        }
    }
}

/// Adapt a stream of base64 chunks into a stream of decoded bytes.
///
/// Decoding failures are reported as [`io::ErrorKind::InvalidData`] errors
/// wrapping a [`FrameError`], so they survive a trip through
/// `tokio_util::io::StreamReader`.
pub fn decode_stream<S, E>(stream: S) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = TextDecoder::new();
        let mut stream = stream.boxed();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(io::Error::other(e));
                    return;
                }
            };

            match decoder.decode(&chunk) {
                Ok(decoded) if decoded.is_empty() => {}
                Ok(decoded) => yield Ok(decoded),
                Err(e) => {
                    yield Err(io::Error::from(e));
                    return;
                }
            }
        }

        if let Err(e) = decoder.finish() {
            yield Err(io::Error::from(e));
        }
    }
}
