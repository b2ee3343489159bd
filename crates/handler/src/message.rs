use bytes::Bytes;
use grpc_web_codec::Frame;

/// A serialized message as it travels between client and handler.
///
/// The gateway never inspects payloads, so a message compressed by its
/// sender (per the call's `grpc-encoding`) is passed along untouched with
/// its compressed flag set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
    compressed: bool,
}

impl Message {
    /// An uncompressed message.
    #[must_use]
    pub const fn new(payload: Bytes) -> Self {
        Self {
            payload,
            compressed: false,
        }
    }

    /// A message whose payload was compressed by its sender.
    #[must_use]
    pub const fn compressed(payload: Bytes) -> Self {
        Self {
            payload,
            compressed: true,
        }
    }

    /// The payload, compressed or not.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Whether the payload is compressed.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Take the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

impl From<&'static str> for Message {
    fn from(payload: &'static str) -> Self {
        Self::new(Bytes::from_static(payload.as_bytes()))
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Self::Data {
            compressed: message.compressed,
            payload: message.payload,
        }
    }
}
